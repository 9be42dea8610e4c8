use std::sync::Arc;

use anyhow::Context;
use mq::JobQueue;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use server::config::AppConfig;
use server::consumers::FailureWatcher;
use server::database::init_db;
use server::dlq::run_promotion_sweep;
use server::extractors::auth::BearerTokenAuthorizer;
use server::metrics::{DlqMetrics, init_metrics};
use server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    if config.auth.admin_token.is_empty() {
        warn!("auth.admin_token is empty; the admin API will reject every request");
    }

    let prometheus = init_metrics().context("Failed to install Prometheus recorder")?;
    let db = init_db(&config.database)
        .await
        .context("Failed to initialize database")?;

    let queue = JobQueue::new(db.clone(), config.queue.clone());
    let metrics = DlqMetrics::new();
    let shutdown = CancellationToken::new();

    let watcher = FailureWatcher::new(db.clone(), queue.clone(), metrics.clone());
    if let Err(e) = watcher.refresh_gauges().await {
        warn!(error = %e, "Failed to load initial DLQ gauges");
    }
    let watcher_handle = watcher.clone().spawn(shutdown.clone());
    let sweep_handle = tokio::spawn(run_promotion_sweep(
        watcher,
        config.dlq.clone(),
        shutdown.clone(),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        db,
        queue,
        authorizer: Arc::new(BearerTokenAuthorizer::new(config.auth.admin_token)),
        metrics,
        prometheus: Some(prometheus),
    };
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);
    info!("Swagger UI at http://{}/swagger-ui", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(watcher_handle, sweep_handle);
    info!("Server stopped");

    Ok(())
}
