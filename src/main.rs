//! # plexus
//!
//! Server binary: loads configuration, installs telemetry, registers the
//! built-in operations and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use plexus_server::{builtin, resolver_from_config, PlexusServer, ServerConfig};
use plexus_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use tracing::{info, warn};

/// Plexus session server.
#[derive(Parser, Debug)]
#[command(name = "plexus", about = "WebSocket session server")]
struct Cli {
    /// JSON config file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Concurrently running heavy operations.
    #[arg(long)]
    rate: Option<usize>,

    /// Default clients to MessagePack when they do not choose.
    #[arg(long)]
    binary: bool,

    /// Default log level; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if self.binary {
            config.default_binary = true;
        }
        Ok(config)
    }

    fn telemetry_config(&self) -> Result<TelemetryConfig> {
        Ok(TelemetryConfig {
            log_level: parse_level(&self.log_level)?,
            json: self.json_logs,
            ..TelemetryConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli.telemetry_config()?).context("Failed to initialise telemetry")?;

    let config = cli.server_config()?;
    let identity = resolver_from_config(&config.identity);
    let operations = builtin::operations();
    info!(operations = ?operations.operations(), "registered operations");

    let handle = PlexusServer::new(config, operations, identity)
        .start()
        .await
        .context("Failed to start server")?;
    info!(addr = %handle.addr(), "plexus ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    if !handle.shutdown().await {
        warn!("shutdown timed out with work still in flight");
    }
    Ok(())
}
