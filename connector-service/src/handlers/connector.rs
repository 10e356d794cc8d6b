use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use service_core::middleware::signature::SHOP_DOMAIN_HEADER;

use crate::dtos::{
    ErrorResponse, ProvisionRequest, ProvisionResponse, TokenRequest, TokenResponse,
};
use crate::AppState;

/// Parses the already-verified body. Malformed JSON is a validation error
/// in the same `{success, message}` shape as every other failure.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))
}

fn claimed_shop(headers: &HeaderMap) -> &str {
    headers
        .get(SHOP_DOMAIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Find or create an account and return a login link for it
#[utoipa::path(
    post,
    path = "/connector/v1/create-user",
    request_body = ProvisionRequest,
    responses(
        (status = 201, description = "Account created", body = ProvisionResponse),
        (status = 200, description = "Account already existed", body = ProvisionResponse),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 401, description = "Request could not be authenticated", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse),
        (status = 500, description = "Directory unavailable", body = ErrorResponse)
    ),
    params(
        ("X-Shopify-Hmac-Sha256" = String, Header, description = "base64 HMAC-SHA256 of the raw body"),
        ("X-Shopify-Shop-Domain" = Option<String>, Header, description = "Caller's shop domain, logged only")
    ),
    tag = "Connector"
)]
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ProvisionResponse>), AppError> {
    let request: ProvisionRequest = parse_body(&body)?;
    tracing::info!(claimed_shop = claimed_shop(&headers), "Provisioning request received");

    let outcome = state.provisioning.provision(request).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(ProvisionResponse::from(outcome))))
}

/// Issue a fresh login link for an existing account
#[utoipa::path(
    post,
    path = "/connector/v1/get-token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 401, description = "Request could not be authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Connector"
)]
pub async fn get_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TokenResponse>, AppError> {
    let request: TokenRequest = parse_body(&body)?;
    tracing::info!(claimed_shop = claimed_shop(&headers), "Token request received");

    let (account, _token, auth_url) = state
        .provisioning
        .issue_for_email(request.email.as_deref())
        .await?;

    Ok(Json(TokenResponse {
        success: true,
        user_id: account.account_id,
        email: account.email,
        auth_url,
        message: "Token generated successfully".to_string(),
    }))
}
