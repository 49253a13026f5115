//! Hooktrap server - webhook capture server with optional public tunnel.

mod config;
mod logging;

use anyhow::Result;
use clap::Parser;
use config::Config;
use hooktrap_core::{ControllerConfig, TunnelConfig, WebhookController};
use logging::{LogConfig, LogFormat};
use std::path::PathBuf;

/// Hooktrap - catch any webhook, watch it live, expose it publicly.
#[derive(Parser, Debug)]
#[command(name = "hooktrap-server")]
#[command(about = "Webhook capture server with optional localhost.run tunnel")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Expose the server publicly through a localhost.run tunnel
    #[arg(short, long)]
    tunnel: bool,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (includes ssh output lines)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "tunnel=debug").
    /// Can be specified multiple times. Targets are prefixed with "hooktrap::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.tunnel {
        config.enable_tunnel = true;
    }

    tracing::info!(target: "hooktrap::startup", "Loaded configuration (port: {})", config.port);

    let controller = WebhookController::new(ControllerConfig {
        host: config.host.clone(),
        tunnel: TunnelConfig {
            ssh_path: config.ssh_path.clone(),
            relay_host: config.relay_host.clone(),
            ..TunnelConfig::default()
        },
        ..ControllerConfig::default()
    });

    let response = controller.start(config.port, config.enable_tunnel).await?;
    tracing::info!(
        target: "hooktrap::startup",
        "Catching webhooks at {} (port {})",
        response.public_url,
        response.port
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "hooktrap::startup", "Shutdown signal received");

    controller.stop().await?;
    Ok(())
}
