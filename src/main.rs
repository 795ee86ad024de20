//! Bridge Tracker - cross-chain bridge progress tracking
//!
//! Follows bridge operations through a relay service and an optional
//! exchange service, turning their stages into a human readable status
//! and persisting every change.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod config;
mod error;
mod metrics;
mod providers;
mod record;
mod state;
mod tracker;

use config::{Settings, StoreBackend};
use metrics::MetricsServer;
use providers::HttpProviderFactory;
use state::{MemoryStore, StateManager, TransactionStore};
use tracker::BridgeTracker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Tracker v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {}",
        settings.tracker.instance_id
    );

    // Initialize record store
    let store: Arc<dyn TransactionStore> = match settings.database.backend {
        StoreBackend::Postgres => {
            let manager = StateManager::new(&settings.database).await?;
            info!("Database connection established");
            manager.run_migrations().await?;
            Arc::new(manager)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory record store - records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize provider clients
    let factory = Arc::new(HttpProviderFactory::new(settings.providers.clone())?);

    let tracker = Arc::new(BridgeTracker::new(
        store.clone(),
        factory,
        Duration::from_millis(settings.tracker.poll_interval_ms),
        settings.chain_names(),
    ));
    info!("Bridge tracker initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            tracker: tracker.clone(),
            store: store.clone(),
            settle_method: settings.providers.exchange.settle_method.clone(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let store = store.clone();
        let interval = settings.tracker.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let healthy = match store.health_check().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Record store health check failed: {}", e);
                        false
                    }
                };

                metrics::record_health_check(healthy);
            }
        }
    });

    info!("Bridge Tracker is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Let in-flight cycles finish and write their records
    tracker.stop().await;

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Tracker stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_tracker=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
