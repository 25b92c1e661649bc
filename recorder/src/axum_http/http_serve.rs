use crate::{
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
    recording_engine::engine::RecordingEngine,
    task_queue::queue::BackgroundTaskQueue,
};
use anyhow::Result;
use axum::{Router, routing::get};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

pub fn router(
    config: &DotEnvyConfig,
    engine: Arc<RecordingEngine>,
    task_queue: Arc<BackgroundTaskQueue>,
) -> Result<Router> {
    let token = config.internal_api.token.clone();
    if token.is_none() {
        warn!("recorder http: INTERNAL_API_TOKEN is not set, internal routes will answer 503");
    }

    Ok(Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/internal/v1/tasks",
            routers::tasks::routes(token.clone(), task_queue),
        )
        .nest(
            "/internal/v1/recordings",
            routers::recordings::routes(token, engine),
        )
        .route("/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.worker_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.worker_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(TraceLayer::new_for_http()))
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn start(
    config: Arc<DotEnvyConfig>,
    engine: Arc<RecordingEngine>,
    task_queue: Arc<BackgroundTaskQueue>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(&config, engine, task_queue)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.worker_server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Recorder HTTP server running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
