use crate::error::AppError;
use crate::utils::signature::verify_body;
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use http_body_util::{BodyExt, Limited};
use secrecy::{ExposeSecret, Secret};

/// Header carrying base64(HMAC-SHA256(secret, raw body)).
pub const HMAC_HEADER: &str = "x-shopify-hmac-sha256";

/// Header carrying the caller's shop domain.
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct SignatureConfig {
    /// Shared caller secret. `None` rejects every request.
    pub secret: Option<Secret<String>>,
    pub header: HeaderName,
    pub max_body_bytes: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            secret: None,
            header: HeaderName::from_static(HMAC_HEADER),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl SignatureConfig {
    pub fn new(secret: Option<Secret<String>>) -> Self {
        Self {
            secret,
            ..Self::default()
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn configured_secret(&self) -> Option<&str> {
        self.secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.is_empty())
    }
}

fn reject(reason: &'static str) -> AppError {
    metrics::counter!("connector_requests_rejected_total", "reason" => reason).increment(1);
    AppError::Authentication(anyhow::anyhow!(reason))
}

/// Verifies the body MAC before anything parses the body.
///
/// The raw bytes are buffered, checked, and handed on unchanged so the
/// handler deserializes exactly what was signed.
pub async fn signature_validation_middleware<S>(
    State(state): State<S>,
    req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: AsRef<SignatureConfig> + Clone + Send + Sync + 'static,
{
    let config = state.as_ref();

    let Some(secret) = config.configured_secret() else {
        tracing::error!("Caller shared secret not configured, rejecting signed request");
        return Err(reject("secret_not_configured"));
    };

    let signature = match req.headers().get(&config.header) {
        Some(value) => value
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| reject("malformed_signature_header"))?,
        None => {
            tracing::warn!(path = %req.uri().path(), "Missing request signature header");
            return Err(reject("missing_signature"));
        }
    };

    let (parts, body) = req.into_parts();
    let bytes = Limited::new(body, config.max_body_bytes)
        .collect()
        .await
        .map_err(|e| {
            tracing::warn!("Failed to read signed body: {}", e);
            reject("unreadable_body")
        })?
        .to_bytes();

    let is_valid = verify_body(secret, &bytes, &signature)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Signature verification error: {}", e)))?;

    if !is_valid {
        tracing::warn!(path = %parts.uri.path(), "Request signature verification failed");
        return Err(reject("invalid_signature"));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}
