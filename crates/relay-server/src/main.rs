//! Multi-instance WebRTC signaling relay server.

mod config;
mod http;
mod metrics;
mod rate_limit;
mod server;
mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::RelayConfig;

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "WebRTC signaling relay server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server.
    Serve {
        /// Override the configured bind address.
        #[arg(short, long, env = "RELAY_BIND_ADDR")]
        addr: Option<String>,

        /// Path to a TOML config file (defaults to the platform config dir).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr, config } => {
            let config_path = config.or_else(RelayConfig::default_path);
            let mut relay_config = RelayConfig::load(config_path.as_deref())?;
            if let Some(addr) = addr {
                relay_config.bind_addr = addr;
                relay_config.validate();
            }

            init_logging(&relay_config);
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay server");
            server::run(relay_config).await
        }
    }
}

fn init_logging(config: &RelayConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if config.log_file.is_some() {
        // TODO: wire log_file to a non-blocking file writer via tracing-appender.
        tracing::warn!("log_file is configured but only stderr logging is wired up so far");
    }
}
