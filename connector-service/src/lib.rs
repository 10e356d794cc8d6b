pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::clock::Clock;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    origin::{origin_guard_middleware, OriginAllowList},
    rate_limit::{ip_rate_limit_middleware, FixedWindowRateLimiter, IpRateLimiter},
    security_headers::{security_headers_middleware, SecurityHeaders},
    signature::{signature_validation_middleware, SignatureConfig},
    tracing::request_id_middleware,
};
use service_core::store::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tower_sessions::{
    cookie::SameSite, Expiry, MemoryStore as SessionMemoryStore, SessionManagerLayer,
};
use utoipa::OpenApi;

use crate::config::ConnectorConfig;
use crate::services::{ProvisioningService, TokenService, UserDirectory};

pub const SESSION_COOKIE_NAME: &str = "connector_session";

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::app::health_check,
        handlers::connector::create_user,
        handlers::connector::get_token,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::ProvisionRequest,
            dtos::ProvisionResponse,
            dtos::TokenRequest,
            dtos::TokenResponse,
        )
    ),
    tags(
        (name = "Connector", description = "Signed account provisioning for the shop app"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: ConnectorConfig,
    pub directory: Arc<dyn UserDirectory>,
    pub store: Arc<dyn KeyValueStore>,
    pub tokens: Arc<TokenService>,
    pub provisioning: ProvisioningService,
    pub signature: Arc<SignatureConfig>,
    pub origins: Arc<OriginAllowList>,
    pub provision_limiter: IpRateLimiter,
    pub security_headers: Arc<SecurityHeaders>,
}

impl AppState {
    /// Wires the services on top of the chosen directory, store and clock.
    pub fn new(
        config: ConnectorConfig,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let ttl = chrono::Duration::try_seconds(config.token.ttl_seconds).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("TOKEN_TTL_SECONDS is out of range"))
        })?;
        let tokens = Arc::new(
            TokenService::new(
                directory.clone(),
                clock,
                config.token.nonce_secret.clone(),
                ttl,
                &config.site.url,
            )
            .with_single_use(config.token.single_use),
        );
        let provisioning = ProvisioningService::new(directory.clone(), tokens.clone());

        let signature = SignatureConfig::new(Some(config.caller.shared_secret.clone()))
            .with_max_body_bytes(config.caller.max_body_bytes);
        let origins = OriginAllowList::parse(&config.caller.allowed_hosts)?;

        let provision_limiter = Arc::new(
            FixedWindowRateLimiter::new(
                store.clone(),
                config.rate_limit.provision_limit,
                Duration::from_secs(config.rate_limit.provision_window_seconds),
            )
            .with_key_prefix("connector_provision")
            .trust_forwarded_for(config.rate_limit.trust_forwarded_for),
        );

        let security_headers = SecurityHeaders::new(config.site.frame_ancestors.clone());

        Ok(Self {
            config,
            directory,
            store,
            tokens,
            provisioning,
            signature: Arc::new(signature),
            origins: Arc::new(origins),
            provision_limiter,
            security_headers: Arc::new(security_headers),
        })
    }
}

impl AsRef<SignatureConfig> for AppState {
    fn as_ref(&self) -> &SignatureConfig {
        &self.signature
    }
}

impl AsRef<OriginAllowList> for AppState {
    fn as_ref(&self) -> &OriginAllowList {
        &self.origins
    }
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    // Caller endpoints: signature, then origin, then rate limit
    let connector_routes = Router::new()
        .route("/connector/v1/create-user", post(handlers::connector::create_user))
        .route("/connector/v1/get-token", post(handlers::connector::get_token))
        .layer(from_fn_with_state(
            state.provision_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            origin_guard_middleware::<AppState>,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            signature_validation_middleware::<AppState>,
        ));

    let inactivity = state
        .config
        .session
        .inactivity_hours
        .checked_mul(3600)
        .map(time::Duration::seconds)
        .ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("SESSION_INACTIVITY_HOURS is out of range"))
        })?;

    let session_layer = SessionManagerLayer::new(SessionMemoryStore::default())
        .with_name(SESSION_COOKIE_NAME)
        .with_secure(state.config.session.secure_cookie)
        // the dashboard is framed by the shop admin, a third-party context
        .with_same_site(if state.config.session.secure_cookie {
            SameSite::None
        } else {
            SameSite::Lax
        })
        .with_expiry(Expiry::OnInactivity(inactivity));

    let app = Router::new()
        .route("/", get(handlers::app::home))
        .route("/dashboard/", get(handlers::app::dashboard))
        .route("/health", get(handlers::app::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(connector_routes)
        .fallback(handlers::app::not_found)
        .with_state(state.clone())
        // Token redemption needs the session, so it sits inside the session layer
        .layer(from_fn_with_state(
            state.clone(),
            middleware::redemption_middleware,
        ))
        .layer(session_layer)
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                // path only: the query may carry a login token
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn_with_state(
            state.security_headers.clone(),
            security_headers_middleware,
        ));

    Ok(app)
}
