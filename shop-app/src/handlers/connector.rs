use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::services::connector_client::CreateUserRequest;
use crate::services::ShopSession;
use crate::AppState;

/// Body posted by the embedded shop UI. `shop` is optional; when present it
/// must name the shop of the session token.
#[derive(Debug, Default, Deserialize)]
pub struct LinkAccountRequest {
    pub email: Option<String>,
    pub shop: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkAccountResponse {
    pub success: bool,
    pub auth_url: Option<String>,
    pub user_id: Option<i64>,
    pub user_exists: bool,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProxyError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn client_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ProxyError {
            error: message.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Provisions (or finds) the merchant's connector account and returns the
/// login link for the browser to open. The shop always comes from the
/// verified session token.
pub async fn create_user(
    State(state): State<AppState>,
    session: ShopSession,
    payload: Option<Json<LinkAccountRequest>>,
) -> Response {
    let Json(payload) = payload.unwrap_or_default();

    let Some(email) = non_blank(payload.email) else {
        return client_error(StatusCode::BAD_REQUEST, "Email is required");
    };

    if let Some(claimed) = non_blank(payload.shop) {
        if !claimed.eq_ignore_ascii_case(&session.shop) {
            tracing::warn!(shop = %session.shop, claimed = %claimed, "Shop in body does not match session");
            return client_error(StatusCode::FORBIDDEN, "Shop does not match the session");
        }
    }
    let shop = session.shop;

    let request = CreateUserRequest {
        email,
        shop,
        first_name: payload.first_name.unwrap_or_default(),
        last_name: payload.last_name.unwrap_or_default(),
    };

    match state.connector.create_user(&request).await {
        Ok(created) => Json(LinkAccountResponse {
            success: true,
            auth_url: created.auth_url,
            user_id: created.user_id,
            user_exists: created.user_exists,
            message: created.message,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(shop = %request.shop, "Connector account link failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ProxyError {
                    error: "Failed to create connector user".to_string(),
                    details: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}
