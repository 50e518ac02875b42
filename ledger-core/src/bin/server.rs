//! Ledger server binary
//!
//! Opens the ledger, verifies every cached balance against its entries and
//! waits for shutdown. Request handling lives in the service layer in front.

use anyhow::Context;
use ledger_core::{Config, Ledger, TracingAuditTrail};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting YUMI Ledger Server");

    // Load configuration
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Opening ledger"
    );

    // Open ledger
    let audit = Arc::new(TracingAuditTrail::new(config.service_name.clone()));
    let ledger = Ledger::open(config, audit).await?;
    let checked = ledger.verify_all_balances()?;
    tracing::info!(accounts = checked, "Ledger opened successfully");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}
