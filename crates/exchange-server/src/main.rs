//! TCP server for the certificate exchange.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use exchange_server::config::Config;
use exchange_server::server;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "exchange-server")]
#[clap(about = "Certificate order matching and settlement server")]
struct Cli {
    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Override the listening port
    #[clap(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(
        addr = %config.socket_addr_string(),
        max_clients = config.max_clients,
        sweep_interval_secs = config.sweep_interval_secs,
        "starting exchange-server"
    );

    server::run(config).await
}
