use connector_service::{
    build_router,
    config::{Backend, ConnectorConfig},
    db,
    services::{InMemoryDirectory, PgDirectory, UserDirectory},
    AppState,
};
use service_core::clock::SystemClock;
use service_core::error::AppError;
use service_core::observability::{init_metrics, init_tracing, shutdown_tracing};
use service_core::store::{KeyValueStore, MemoryStore, RedisStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = ConnectorConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting connector service"
    );

    let directory: Arc<dyn UserDirectory> = match config.directory.backend {
        Backend::Postgres => {
            let database = config.directory.database.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required for postgres"))
            })?;
            let pool = db::create_pool(database)
                .await
                .map_err(|e| AppError::Upstream(anyhow::Error::new(e)))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::Upstream(anyhow::Error::new(e)))?;
            Arc::new(PgDirectory::new(pool))
        }
        _ => {
            tracing::info!("Using in-memory account directory");
            Arc::new(InMemoryDirectory::new())
        }
    };

    let store: Arc<dyn KeyValueStore> = match &config.store.redis_url {
        Some(url) if config.store.backend == Backend::Redis => Arc::new(RedisStore::connect(url).await?),
        _ => {
            tracing::info!("Using in-process rate limit store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(config.clone(), directory, store, Arc::new(SystemClock))?;
    let app = build_router(state)?;

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
