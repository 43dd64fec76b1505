use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ccproxy", about = "Reverse proxy for LLM APIs", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the proxy server.
    Serve {
        /// Path to the configuration file. Falls back to
        /// `$XDG_CONFIG_HOME/ccproxy/config.toml`, then built-in defaults.
        #[arg(short, long, env = "CCPROXY_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate the configuration file and exit.
    Check {
        #[arg(short, long, env = "CCPROXY_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<config::Config> {
    match path.or_else(config::discover_config_path) {
        Some(path) => config::load(path),
        None => Ok(config::Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            let config = load_config(config)?;
            server::init_logger(&config.server.log_filter);
            server::serve(config).await
        }
        Command::Check { config } => {
            let config = load_config(config)?;
            println!(
                "configuration ok: {} provider(s), listening on {}",
                config.providers.len(),
                config.server.listen_address
            );
            Ok(())
        }
    }
}
