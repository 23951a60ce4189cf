// =============================================================================
// Bloodbridge Daemon - Coordination Service Entry Point
// =============================================================================
// Table of Contents:
// 1. Imports
// 2. Configuration Loading
// 3. Main Entry Point
// 4. Shutdown Signal
// =============================================================================

use anyhow::Context;
use bloodbridge::notifier::WebhookNotifier;
use bloodbridge::{BridgeConfig, CoordinatorBuilder, MemoryStore, NominatimGeocoder};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// -----------------------------------------------------------------------------
// 2. Configuration Loading
// -----------------------------------------------------------------------------

/// TOML file taking precedence over the environment when set.
const CONFIG_PATH_VAR: &str = "BLOODBRIDGE_CONFIG";

fn load_config() -> anyhow::Result<BridgeConfig> {
    match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) => {
            tracing::info!(path = %path, "Loading configuration file");
            BridgeConfig::from_file(&path).with_context(|| format!("reading {}", path))
        }
        Err(_) => BridgeConfig::from_env().context("reading configuration from environment"),
    }
}

// -----------------------------------------------------------------------------
// 3. Main Entry Point
// -----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Try current directory first, then crates/bloodbridge-daemon/
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_filename("crates/bloodbridge-daemon/.env");
    }

    let config = load_config()?;

    let notifier = WebhookNotifier::new(config.notifier.clone())?;
    let geocoder = NominatimGeocoder::new(&config.geocoder)?;

    let coordinator = CoordinatorBuilder::new()
        .with_config(config)
        .with_store(Arc::new(MemoryStore::new()))
        .with_notifier(Arc::new(notifier))
        .with_geocoder(Arc::new(geocoder))
        .build()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "🩸 Bloodbridge coordinator starting"
    );

    tokio::select! {
        result = coordinator.run() => result?,
        _ = shutdown_signal() => {
            coordinator.shutdown().await?;
        }
    }

    if let Some(metrics) = coordinator.metrics() {
        if let Ok(text) = metrics.gather_text() {
            tracing::debug!(metrics = %text, "Final metrics");
        }
    }

    tracing::info!("Bloodbridge coordinator exited");
    Ok(())
}

// -----------------------------------------------------------------------------
// 4. Shutdown Signal
// -----------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
}
