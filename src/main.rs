//! LessonSync Node: presence and live session reconciliation
//!
//! Main entry point that wires the store, the reconciliation tasks and the
//! presence projection listener together and runs them until shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use lessonsync_core::config::AppConfig;
use lessonsync_core::error::AppError;
use lessonsync_core::traits::clock::{Clock, SystemClock};
use lessonsync_core::traits::store::DocumentStore;
use lessonsync_store::StoreManager;
use lessonsync_worker::tasks::{PresenceProjectionTask, RosterPruneTask};
use lessonsync_worker::{ProjectionListener, ReconcileRunner, RetryPolicy};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Node error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("LESSONSYNC_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main node run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting LessonSync node v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Initialize document store ────────────────────────
    tracing::info!(
        "Initializing document store (provider: {})...",
        config.store.provider
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store_manager = StoreManager::new(&config.store, Arc::clone(&clock))?;
    let store: Arc<dyn DocumentStore> = store_manager.provider();
    if !store.health_check().await? {
        return Err(AppError::service_unavailable("Document store failed health check"));
    }
    tracing::info!("Document store initialized");

    // ── Step 2: Reconciliation tasks ─────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let projection = Arc::new(PresenceProjectionTask::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        &config.presence,
        RetryPolicy::from_config(&config.worker),
    ));
    let roster = Arc::new(RosterPruneTask::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        &config.session,
    ));

    let mut runner = ReconcileRunner::new(config.worker.clone());
    runner.register(projection.clone());
    runner.register(roster);

    let runner_cancel = shutdown_rx.clone();
    let runner_handle = tokio::spawn(async move {
        runner.run(runner_cancel).await;
    });

    // ── Step 3: Event-driven projection ──────────────────────────
    let listener_handle = if config.worker.enabled {
        let listener = ProjectionListener::new(Arc::clone(&store), projection);
        let listener_cancel = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            listener.run(listener_cancel).await;
        }))
    } else {
        tracing::info!("Projection listener disabled");
        None
    };

    tracing::info!(
        heartbeat_s = config.presence.heartbeat_interval_seconds,
        stale_s = config.presence.stale_threshold_seconds,
        "LessonSync node running"
    );

    // ── Step 4: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping background tasks...");
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), runner_handle).await;
    if let Some(handle) = listener_handle {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(10), handle).await;
    }

    tracing::info!("LessonSync node shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
