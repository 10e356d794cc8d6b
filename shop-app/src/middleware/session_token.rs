use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};

use crate::handlers::connector::ProxyError;
use crate::services::ShopSession;
use crate::AppState;

fn unauthorized(message: &str) -> (StatusCode, Json<ProxyError>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ProxyError {
            error: message.to_string(),
            details: None,
        }),
    )
}

/// Requires `Authorization: Bearer <session token>` and stores the verified
/// shop in the request extensions.
pub async fn session_token_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, Json<ProxyError>)> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        metrics::counter!("shop_app_session_token_rejected_total", "reason" => "missing").increment(1);
        return Err(unauthorized("Missing or invalid Authorization header"));
    };

    let session = state.session_tokens.verify(token).map_err(|e| {
        tracing::warn!(error = %e, "Rejected session token");
        metrics::counter!("shop_app_session_token_rejected_total", "reason" => "invalid").increment(1);
        unauthorized("Invalid or expired session token")
    })?;

    req.extensions_mut().insert(session);

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for ShopSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ProxyError>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<ShopSession>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ProxyError {
                error: "Shop session missing from request extensions".to_string(),
                details: None,
            }),
        ))
    }
}
