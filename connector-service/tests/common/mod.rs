//! Shared setup for connector-service integration tests.
//!
//! Everything runs in process: in-memory directory and store, a manual
//! clock, and requests driven through the router with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, Response},
    Router,
};
use connector_service::{
    build_router,
    config::{
        Backend, CallerConfig, ConnectorConfig, DirectoryConfig, Environment, RateLimitConfig,
        SessionConfig, SiteConfig, StoreConfig, TokenConfig,
    },
    dtos::ProvisionResponse,
    services::InMemoryDirectory,
    AppState, SESSION_COOKIE_NAME,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use service_core::clock::ManualClock;
use service_core::middleware::signature::HMAC_HEADER;
use service_core::store::MemoryStore;
use service_core::utils::signature::sign_body;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const SHARED_SECRET: &str = "shpss_integration_secret";
pub const SITE_URL: &str = "https://connector.test";
pub const CALLER_ORIGIN: &str = "https://shop-app.test";
pub const LANDING_PATH: &str = "/dashboard/";

pub fn test_config() -> ConnectorConfig {
    ConnectorConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "connector-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        site: SiteConfig {
            url: SITE_URL.to_string(),
            landing_path: LANDING_PATH.to_string(),
            frame_ancestors: vec!["https://admin.shopify.com".to_string()],
        },
        caller: CallerConfig {
            shared_secret: Secret::new(SHARED_SECRET.to_string()),
            allowed_hosts: vec!["shop-app.test".to_string(), "localhost:3000".to_string()],
            max_body_bytes: 64 * 1024,
        },
        token: TokenConfig {
            nonce_secret: Secret::new("integration-nonce-secret".to_string()),
            ttl_seconds: 86_400,
            single_use: false,
        },
        rate_limit: RateLimitConfig {
            provision_limit: 10,
            provision_window_seconds: 60,
            trust_forwarded_for: false,
        },
        directory: DirectoryConfig {
            backend: Backend::Memory,
            database: None,
        },
        store: StoreConfig {
            backend: Backend::Memory,
            redis_url: None,
        },
        session: SessionConfig {
            secure_cookie: false,
            inactivity_hours: 24,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub directory: Arc<InMemoryDirectory>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ConnectorConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(InMemoryDirectory::new());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));

        let state = AppState::new(config, directory.clone(), store, clock.clone())
            .expect("Failed to build state");
        let router = build_router(state.clone()).expect("Failed to build router");

        Self {
            router,
            state,
            directory,
            clock,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.send_from(req, default_peer()).await
    }

    pub async fn send_from(&self, mut req: Request<Body>, peer: SocketAddr) -> Response<Body> {
        req.extensions_mut().insert(ConnectInfo(peer));
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Signed provisioning call that is expected to succeed.
    pub async fn provision(&self, email: &str, shop: &str) -> ProvisionResponse {
        let body = serde_json::json!({ "email": email, "shop": shop }).to_string();
        let res = self
            .send(signed_post("/connector/v1/create-user", &body))
            .await;
        assert!(
            res.status().is_success(),
            "provisioning failed with {}",
            res.status()
        );
        serde_json::from_value(body_json(res).await).unwrap()
    }

    /// Follows a redemption link, optionally presenting a session cookie.
    pub async fn visit(&self, url: &str, cookie: Option<&str>) -> Response<Body> {
        let mut req = Request::builder().method("GET").uri(local_part(url));
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }
}

pub fn default_peer() -> SocketAddr {
    SocketAddr::from(([203, 0, 113, 7], 51000))
}

/// POST with a valid MAC over exactly `body` and an allowed Origin.
pub fn signed_post(path: &str, body: &str) -> Request<Body> {
    let signature = sign_body(SHARED_SECRET, body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ORIGIN, CALLER_ORIGIN)
        .header(HMAC_HEADER, signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Strips the site base so the URL can be sent to the router.
pub fn local_part(url: &str) -> &str {
    url.strip_prefix(SITE_URL).unwrap_or(url)
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(res: Response<Body>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `name=value` of the session cookie set by `res`, if any.
pub fn session_cookie(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{}=", SESSION_COOKIE_NAME)))
        .map(str::to_string)
}

pub fn location(res: &Response<Body>) -> &str {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
