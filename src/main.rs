// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use promdash::application::dashboard_service::DashboardService;
use promdash::application::persistence::PersistenceGateway;
use promdash::domain::panel::default_panels;
use promdash::domain::series::RangeSpec;
use promdash::infrastructure::config::load_config;
use promdash::infrastructure::prometheus_repository::PrometheusRepository;
use promdash::infrastructure::snapshot_storage::FileSnapshotStorage;
use promdash::presentation::app_state::AppState;
use promdash::presentation::handlers::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("promdash=info,tower_http=info")),
        )
        .init();

    let config = load_config().context("Failed to load configuration")?;

    // Create repository (infrastructure layer)
    let repository = Arc::new(PrometheusRepository::new(
        &config.prometheus.endpoint,
        &config.prometheus.range_path,
        &config.prometheus.instance_details_path,
        config.prometheus.timeout(),
    )?);

    // Create services (application layer)
    let dashboard_service = DashboardService::new(
        repository,
        default_panels(),
        &config.dashboard.no_instance_sentinel,
        RangeSpec::new(config.prometheus.default_range_minutes, config.prometheus.step_secs),
    );

    let storage = Arc::new(FileSnapshotStorage::new(&config.storage.snapshot_path));
    let gateway = PersistenceGateway::new(storage);
    dashboard_service.restore(&gateway).await;
    let autosave = gateway.spawn_autosave(dashboard_service.subscribe(), config.storage.save_interval());

    let state = Arc::new(AppState { dashboard_service });

    // Responses are compressed in the handlers, so no CompressionLayer here
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind_addr))?;
    tracing::info!("Starting promdash on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last handle on the dashboard state, so the
    // snapshot sender is gone and autosave flushes its final write.
    if let Err(e) = autosave.await {
        tracing::error!("Autosave task failed: {}", e);
    }
    tracing::info!("promdash stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received, draining connections");
}
