use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use compliance_orchestrator_api::app::{create_app, AppState, Repositories};
use compliance_orchestrator_api::config::Config;
use compliance_orchestrator_api::jobs::{
    CircuitMonitorJob, JobScheduler, MetricsSnapshotJob, RetentionCleanupJob, RetryScanJob,
};
use compliance_orchestrator_api::middleware;

/// Records left PROCESSING by a previous run that are recovered at startup.
const RECOVERY_LIMIT: i64 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load and validate configuration
    let config = Config::load()?;

    // Initialize logging and metrics
    middleware::logging::init_logging(&config.logging);
    middleware::init_metrics().context("failed to install Prometheus recorder")?;

    info!("Starting Compliance Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Create database pool
    let pool = persistence::db::create_pool(&config.database.pool_config()).await?;

    // Run migrations
    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    let state = AppState::build(
        config.clone(),
        Repositories::postgres(pool.clone()),
        Some(pool.clone()),
    )?;

    let recovered = state.store.recover_interrupted(RECOVERY_LIMIT).await?;
    if recovered > 0 {
        warn!(recovered, "Recovered assessments interrupted by a previous shutdown");
    }

    let shutdown = CancellationToken::new();

    // Assessment batch loop
    let processor_task = state.processor.start(shutdown.child_token());
    let queued = state
        .processor
        .enqueue_due(config.processor.retry_scan_limit)
        .await?;
    info!(queued, "Queued pending and due assessments");

    // Background jobs
    let mut scheduler = JobScheduler::new(shutdown.child_token());
    scheduler.register(RetryScanJob::new(
        state.processor.clone(),
        config.processor.retry_scan_interval_secs,
        config.processor.retry_scan_limit,
    ));
    scheduler.register(CircuitMonitorJob::new(
        state.processor.breaker().clone(),
        config.circuit_breaker.monitor_interval_secs,
    ));
    scheduler.register(RetentionCleanupJob::new(
        state.store.clone(),
        state.repositories.audit_logs.clone(),
        state.repositories.metrics.clone(),
        state.remediation.engine().backups().clone(),
        config.retention.clone(),
    ));
    scheduler.register(MetricsSnapshotJob::new(
        state.processor.clone(),
        state.remediation.engine().clone(),
        state.repositories.metrics.clone(),
        Some(pool),
        config.retention.metrics_snapshot_interval_secs,
    ));
    scheduler.start();

    tokio::spawn(wait_for_signal(shutdown.clone()));

    // Start server
    let app = create_app(state.clone());
    let addr = config.socket_addr()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped, draining background work");
    let timeout = config.shutdown_timeout();
    shutdown.cancel();

    scheduler.wait_for_shutdown(timeout).await;
    if tokio::time::timeout(timeout, processor_task).await.is_err() {
        warn!("Assessment processor did not stop within {:?}", timeout);
    }
    if tokio::time::timeout(timeout, state.remediation.shutdown())
        .await
        .is_err()
    {
        warn!("Remediation executions still running after {:?}", timeout);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on SIGTERM or SIGINT.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
        }
    }

    shutdown.cancel();
}
