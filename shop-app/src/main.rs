use dotenvy::dotenv;
use service_core::observability::{init_metrics, init_tracing, shutdown_tracing};
use shop_app::config::get_configuration;
use shop_app::services::{ConnectorClient, SessionTokenVerifier};
use shop_app::startup::build_router;
use shop_app::AppState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        &configuration.server.service_name,
        &configuration.server.log_level,
        configuration.server.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    if configuration.connector.secret().is_none() {
        tracing::warn!("APP_CONNECTOR__SHARED_SECRET is not set; connector calls will fail");
    }

    let session_tokens = Arc::new(
        SessionTokenVerifier::new(&configuration.session_token).map_err(|e| {
            tracing::error!("Failed to configure session token verification: {}", e);
            anyhow::anyhow!("Set APP_SESSION_TOKEN__API_SECRET: {}", e)
        })?,
    );
    let connector = Arc::new(ConnectorClient::new(configuration.connector.clone())?);
    let app = build_router(AppState::new(connector, session_tokens));

    let address = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting shop-app on {}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            anyhow::anyhow!("Server error: {}", e)
        })?;

    shutdown_tracing();
    Ok(())
}
