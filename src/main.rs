use clap::Parser;

use transcript_assets::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Resolve(args) => cli::handle_resolve(&args).await.map(|_| ()),
        Command::Config(ConfigCommand::Show { config }) => {
            cli::handle_config_show(config.as_deref())
        }
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path();
            Ok(())
        }
        Command::Version => {
            cli::handle_version();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
