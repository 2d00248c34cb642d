//! WebCLI server entry point.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;
mod websocket;

/// Command-line options for the server binary.
#[derive(Debug, Parser)]
#[command(name = "webcli", version, about = "Browser-delivered restricted shell")]
struct Cli {
    /// Path to the server configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webcli=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = server::config::AppConfig::load(cli.config.as_deref())?;
    server::run(config).await
}
