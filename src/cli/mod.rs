//! CLI subcommand definitions and handlers.
//!
//! - `resolve` -- resolve the assets of a transcript JSON file
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

use crate::assets::{AssetResolver, ResolveReport};
use crate::config::{self, AssetsConfig};
use crate::logging;
use crate::transcript::{Message, Transcript, TranscriptState};

/// SSRF-safe asset resolution for chat transcripts.
#[derive(Parser, Debug)]
#[command(
    name = "transcript-assets",
    version = env!("CARGO_PKG_VERSION"),
    about = "Resolve transcript asset URLs safely: vet, pin, offload or inline"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve every asset URL in a transcript file.
    Resolve(ResolveArgs),

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Transcript JSON: `{ messages, state }` or a bare message array.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output file (default: stdout).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (default: the per-user config location, if present).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Embed assets as data URLs.
    #[arg(long)]
    pub save_inline: bool,

    /// Do not print resolution warnings.
    #[arg(long)]
    pub suppress_warnings: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the loaded configuration (secrets redacted) as JSON.
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Config keys whose values are never printed.
const SECRET_KEYS: &[&str] = &["apiSecret", "apiKey"];

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptInput {
    Messages(Vec<Message>),
    Full(Transcript),
}

/// Load, validate and apply command-line overrides to the configuration.
pub fn load_config(
    path: Option<&Path>,
    save_inline: bool,
    suppress_warnings: bool,
) -> Result<AssetsConfig, config::ConfigError> {
    let mut cfg = config::load_with_env(path)?;
    cfg.save_inline |= save_inline;
    cfg.suppress_warnings |= suppress_warnings;
    Ok(cfg)
}

/// Parse transcript JSON. A bare message array gets its author table built.
pub fn parse_transcript(raw: &str) -> Result<Transcript, serde_json::Error> {
    Ok(match serde_json::from_str(raw)? {
        TranscriptInput::Full(transcript) => transcript,
        TranscriptInput::Messages(messages) => {
            let mut state = TranscriptState::default();
            state.collect_authors(&messages);
            Transcript {
                messages,
                state,
                ..Transcript::default()
            }
        }
    })
}

/// Run the `resolve` subcommand.
pub async fn handle_resolve(args: &ResolveArgs) -> Result<ResolveReport, Box<dyn std::error::Error>> {
    let cfg = load_config(
        args.config.as_deref(),
        args.save_inline,
        args.suppress_warnings,
    )?;
    if let Err(e) = logging::init_logging(&cfg.logging) {
        eprintln!("logging disabled: {e}");
    }

    let resolver = AssetResolver::new(cfg.resolver_options()?)?;

    let raw = tokio::fs::read_to_string(&args.input).await?;
    let mut transcript = parse_transcript(&raw)?;
    let report = resolver.resolve_transcript(&mut transcript).await;

    let rendered = serde_json::to_string_pretty(&transcript)?;
    match &args.output {
        Some(path) => tokio::fs::write(path, rendered).await?,
        None => println!("{rendered}"),
    }

    tracing::info!(
        unique_urls = report.unique_urls,
        references = report.references,
        fallbacks = report.fallbacks,
        over_capacity = report.over_capacity,
        warnings = report.warnings,
        "transcript assets resolved"
    );
    Ok(report)
}

/// Run the `config show` subcommand.
pub fn handle_config_show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_with_env(path)?;
    let mut value = serde_json::to_value(&cfg)?;
    redact_secrets(&mut value);
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    match config::default_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("no per-user config directory on this platform"),
    }
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("transcript-assets {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("TRANSCRIPT_ASSETS_BUILD_DATE"));
    println!("  Git commit: {}", env!("TRANSCRIPT_ASSETS_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && v.is_string() {
                    *v = Value::String("***REDACTED***".to_string());
                } else {
                    redact_secrets(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}
