use crate::error::AppError;
use crate::store::{KeyValueStore, StoreError};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

/// Bucket shared by every request whose peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { count: u64 },
    Denied { retry_after: Duration },
}

/// Fixed-window counter per client key.
///
/// The first request in a window creates the counter with the window as its
/// expiry; later requests increment it without extending that expiry.
#[derive(Clone)]
pub struct FixedWindowRateLimiter {
    store: Arc<dyn KeyValueStore>,
    max_requests: u64,
    window: Duration,
    key_prefix: String,
    trust_forwarded_for: bool,
}

pub type IpRateLimiter = Arc<FixedWindowRateLimiter>;

impl FixedWindowRateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            max_requests: max_requests.max(1),
            window: window.max(Duration::from_secs(1)),
            key_prefix: "rate_limit".to_string(),
            trust_forwarded_for: false,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Key clients by the first `X-Forwarded-For` hop. Only enable behind a
    /// proxy that overwrites the header.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key_for(&self, client: &str) -> String {
        format!("{}_{}", self.key_prefix, client)
    }

    /// Counts the request and decides whether it may proceed.
    pub async fn check_and_increment(&self, client: &str) -> Result<RateLimitDecision, StoreError> {
        let counter = self
            .store
            .increment(&self.key_for(client), self.window)
            .await?;

        if counter.count > self.max_requests {
            let retry_after = if counter.expires_in.is_zero() {
                self.window
            } else {
                counter.expires_in
            };
            return Ok(RateLimitDecision::Denied { retry_after });
        }

        Ok(RateLimitDecision::Allowed {
            count: counter.count,
        })
    }

    /// Resolves the client key for a request.
    pub fn client_key(&self, req: &Request, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_for {
            let forwarded_ip = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok());

            if let Some(ip) = forwarded_ip {
                return ip.to_string();
            }
        }

        match peer {
            Some(addr) => addr.ip().to_string(),
            None => UNKNOWN_CLIENT.to_string(),
        }
    }
}

pub fn create_ip_rate_limiter(
    store: Arc<dyn KeyValueStore>,
    max_requests: u64,
    window_seconds: u64,
) -> IpRateLimiter {
    Arc::new(FixedWindowRateLimiter::new(
        store,
        max_requests,
        Duration::from_secs(window_seconds),
    ))
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let client = limiter.client_key(&request, peer);
    if peer.is_none() {
        tracing::warn!("Could not determine peer address, using shared rate limit bucket");
    }

    match limiter.check_and_increment(&client).await {
        Ok(RateLimitDecision::Allowed { .. }) => Ok(next.run(request).await),
        Ok(RateLimitDecision::Denied { retry_after }) => {
            tracing::warn!(client = %client, "Rate limit exceeded");
            metrics::counter!("connector_requests_rejected_total", "reason" => "rate_limited")
                .increment(1);
            // round up so a client never retries inside the window
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            Err(AppError::RateLimited {
                retry_after: Some(secs.max(1)),
            })
        }
        Err(e) => {
            tracing::error!(client = %client, "Rate limit store unavailable: {}", e);
            Err(AppError::Upstream(anyhow::Error::new(e)))
        }
    }
}
