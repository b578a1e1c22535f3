//! # RPC Gateway Runtime
//!
//! Entry point for the gateway process. See the library docs for the
//! startup and shutdown sequences.
//!
//! ## Environment
//!
//! - `RPC_GATEWAY_CONFIG`: JSON config file
//! - `RPC_BROKER_URL`, `RPC_DEFAULT_TIMEOUT_MS`, `RPC_MAX_PENDING`
//! - `RPC_BANK_QUEUE`, `RPC_DIRECTORY_QUEUE`
//! - `RUST_LOG` / `RPC_LOG_LEVEL`, `RPC_JSON_LOGS`

use anyhow::{Context, Result};
use gateway_runtime::{init_logging, GatewayRuntime, RuntimeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let mut runtime = GatewayRuntime::new(config)?;
    runtime.start().await?;

    info!("Gateway is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;

    Ok(())
}
