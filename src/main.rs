//! wshub - standalone WebSocket fan-out server

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wshub::config::ServerConfig;
use wshub::server::{WsServer, wait_for_exit_then_cleanup};

/// wshub CLI.
#[derive(Parser)]
#[command(name = "wshub")]
#[command(about = "WebSocket fan-out server")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Upgrade path, overrides the config file
    #[arg(short, long)]
    path: Option<String>,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_yaml_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = &cli.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(path) = &cli.path {
        config.base_path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let server = WsServer::new(load_config(&cli)?)?;
    server.start().await?;
    server.block_until_ready().await?;

    let trigger = wait_for_exit_then_cleanup(|| server.stop(), std::future::pending::<()>()).await;
    tracing::info!(trigger = ?trigger, "wshub exited");
    Ok(())
}
