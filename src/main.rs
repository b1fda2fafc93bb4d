//! Bridge process entry point.
//!
//! Loads the configuration named on the command line (default
//! `bs440.toml`), builds the configured plugins, and services the
//! configured scales until interrupted.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use medisana_rust_ble::{build_plugins, Config, ConnectionManager, PluginDispatcher, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "bs440.toml".to_string());

    let config = Config::load(&config_path)?;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting medisana-rust-ble: {} scale(s), {} plugin(s)",
        config.devices.len(),
        config.plugins.len()
    );

    let plugins = build_plugins(&config)?;
    let dispatcher = Arc::new(PluginDispatcher::new(plugins));

    let manager = Arc::new(ConnectionManager::new(config, dispatcher));

    // Translate Ctrl-C into a graceful shutdown: in-flight sessions close
    // their links without dispatching partial data.
    let shutdown_manager = manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown_manager.shutdown(),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    manager.run().await?;

    info!("Bridge stopped");
    Ok(())
}
