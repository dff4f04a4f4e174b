//! Configuration
//!
//! JSON5 config file with camelCase keys. Every field has a default, so an
//! empty file (or no file) is a valid configuration.
//!
//! ```json5
//! {
//!   cdn: { provider: "cloudinary", cloudName: "demo", apiKey: "1234", apiSecret: "..." },
//!   saveInline: false,
//!   cdnConcurrency: 4,
//!   logging: { level: "info", format: "text" },
//! }
//! ```
//!
//! Secrets can be kept out of the file with environment overrides:
//! `TRANSCRIPT_ASSETS_CLOUDINARY_API_SECRET`,
//! `TRANSCRIPT_ASSETS_UPLOADCARE_PUBLIC_KEY` and
//! `TRANSCRIPT_ASSETS_SUPPRESS_WARNINGS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::cdn::CdnOptions;
use crate::assets::inline::{InlineConfig, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_INLINE_BYTES};
use crate::assets::limiter::{DEFAULT_CDN_CONCURRENCY, DEFAULT_INLINE_CONCURRENCY};
use crate::assets::pinning::{IpRange, DEFAULT_METADATA_RANGES};
use crate::assets::resolver::ResolverOptions;
use crate::assets::safety::{SafetyConfig, DEFAULT_DNS_TIMEOUT_MS};
use crate::logging::LoggingConfig;

pub const ENV_CLOUDINARY_API_SECRET: &str = "TRANSCRIPT_ASSETS_CLOUDINARY_API_SECRET";
pub const ENV_UPLOADCARE_PUBLIC_KEY: &str = "TRANSCRIPT_ASSETS_UPLOADCARE_PUBLIC_KEY";
pub const ENV_SUPPRESS_WARNINGS: &str = "TRANSCRIPT_ASSETS_SUPPRESS_WARNINGS";

const CONFIG_FILE_NAME: &str = "config.json5";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// CDN provider settings. The custom provider is code-only and has no file
/// representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CdnConfig {
    Cloudinary {
        cloud_name: String,
        api_key: String,
        #[serde(default)]
        api_secret: String,
    },
    Uploadcare {
        #[serde(default)]
        public_key: String,
    },
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn: Option<CdnConfig>,
    pub save_inline: bool,
    pub suppress_warnings: bool,
    /// Clear optional fields instead of writing the placeholder.
    pub allow_null: bool,
    pub cdn_concurrency: usize,
    pub inline_concurrency: usize,
    pub dns_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub max_inline_bytes: usize,
    /// CIDR blocks rejected on top of the built-in private ranges.
    pub metadata_ranges: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cache_entries: Option<usize>,
    pub logging: LoggingConfig,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            cdn: None,
            save_inline: false,
            suppress_warnings: false,
            allow_null: false,
            cdn_concurrency: DEFAULT_CDN_CONCURRENCY,
            inline_concurrency: DEFAULT_INLINE_CONCURRENCY,
            dns_timeout_ms: DEFAULT_DNS_TIMEOUT_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
            metadata_ranges: DEFAULT_METADATA_RANGES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            max_cache_entries: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Default config location: `<config dir>/transcript-assets/config.json5`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("transcript-assets").join(CONFIG_FILE_NAME))
}

/// Read and parse a config file. Environment overrides are not applied.
pub fn load(path: &Path) -> Result<AssetsConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    AssetsConfig::from_json5_str(&raw)
}

/// Load the file at `path`, or the default location if it exists, then apply
/// environment overrides and validate.
pub fn load_with_env(path: Option<&Path>) -> Result<AssetsConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load(path)?,
        None => match default_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using default config file");
                load(&path)?
            }
            None => AssetsConfig::default(),
        },
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl AssetsConfig {
    pub fn from_json5_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        json5::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(ENV_CLOUDINARY_API_SECRET) {
            if let Some(CdnConfig::Cloudinary { api_secret, .. }) = &mut self.cdn {
                *api_secret = secret;
            }
        }
        if let Some(key) = lookup(ENV_UPLOADCARE_PUBLIC_KEY) {
            match &mut self.cdn {
                Some(CdnConfig::Uploadcare { public_key }) => *public_key = key,
                None => self.cdn = Some(CdnConfig::Uploadcare { public_key: key }),
                Some(CdnConfig::Cloudinary { .. }) => {}
            }
        }
        if let Some(value) = lookup(ENV_SUPPRESS_WARNINGS) {
            match parse_flag(&value) {
                Some(flag) => self.suppress_warnings = flag,
                None => tracing::debug!(value = %value, "ignoring unrecognised {ENV_SUPPRESS_WARNINGS}"),
            }
        }
    }

    /// Check values that would otherwise fail at run time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cdn_concurrency == 0 {
            return Err(ConfigError::Invalid("cdnConcurrency must be at least 1".into()));
        }
        if self.inline_concurrency == 0 {
            return Err(ConfigError::Invalid("inlineConcurrency must be at least 1".into()));
        }
        if self.dns_timeout_ms == 0 || self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".into()));
        }
        if self.max_inline_bytes == 0 {
            return Err(ConfigError::Invalid("maxInlineBytes must be greater than zero".into()));
        }
        if self.max_cache_entries == Some(0) {
            return Err(ConfigError::Invalid("maxCacheEntries must be at least 1 when set".into()));
        }
        match &self.cdn {
            Some(CdnConfig::Cloudinary {
                cloud_name,
                api_key,
                api_secret,
            }) => {
                if cloud_name.is_empty() || api_key.is_empty() {
                    return Err(ConfigError::Invalid(
                        "cloudinary requires cloudName and apiKey".into(),
                    ));
                }
                if api_secret.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "cloudinary apiSecret missing (set it in the file or {ENV_CLOUDINARY_API_SECRET})"
                    )));
                }
            }
            Some(CdnConfig::Uploadcare { public_key }) if public_key.is_empty() => {
                return Err(ConfigError::Invalid(format!(
                    "uploadcare publicKey missing (set it in the file or {ENV_UPLOADCARE_PUBLIC_KEY})"
                )));
            }
            _ => {}
        }
        self.parsed_metadata_ranges().map(|_| ())
    }

    fn parsed_metadata_ranges(&self) -> Result<Vec<IpRange>, ConfigError> {
        self.metadata_ranges
            .iter()
            .map(|r| {
                r.parse::<IpRange>()
                    .map_err(|e| ConfigError::Invalid(format!("metadataRanges: {e}")))
            })
            .collect()
    }

    pub fn cdn_options(&self) -> Option<CdnOptions> {
        self.cdn.as_ref().map(|cdn| match cdn {
            CdnConfig::Cloudinary {
                cloud_name,
                api_key,
                api_secret,
            } => CdnOptions::Cloudinary {
                cloud_name: cloud_name.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            },
            CdnConfig::Uploadcare { public_key } => CdnOptions::Uploadcare {
                public_key: public_key.clone(),
            },
        })
    }

    /// Build the resolver options this configuration describes.
    pub fn resolver_options(&self) -> Result<ResolverOptions, ConfigError> {
        Ok(ResolverOptions {
            save_inline: self.save_inline,
            suppress_warnings: self.suppress_warnings,
            allow_null: self.allow_null,
            cdn: self.cdn_options(),
            cdn_concurrency: self.cdn_concurrency,
            inline_concurrency: self.inline_concurrency,
            safety: SafetyConfig {
                metadata_ranges: self.parsed_metadata_ranges()?,
                dns_timeout: Duration::from_millis(self.dns_timeout_ms),
            },
            inline: InlineConfig {
                timeout: Duration::from_millis(self.fetch_timeout_ms),
                max_bytes: self.max_inline_bytes,
            },
            max_cache_entries: self.max_cache_entries,
        })
    }
}
