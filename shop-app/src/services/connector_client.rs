//! Signed calls to the connector service.
//!
//! The JSON body is serialized once, the MAC is computed over those bytes,
//! and the same bytes go on the wire.

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use service_core::middleware::signature::{HMAC_HEADER, SHOP_DOMAIN_HEADER};
use service_core::observability::TracedClientExt;
use service_core::utils::signature::sign_body;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConnectorSettings;

pub const USER_AGENT: &str = "Shopify-App/1.0";

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector shared secret is not configured")]
    MissingSecret,

    #[error("failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to sign request: {0}")]
    Signing(anyhow::Error),

    #[error("connector request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("connector API error: {status} - {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("{0}")]
    Unsuccessful(String),
}

/// Body bytes and the MAC computed over exactly those bytes.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub body: Vec<u8>,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub shop: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize)]
struct GetTokenRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    pub success: bool,
    #[serde(default)]
    pub user_exists: bool,
    pub user_id: Option<i64>,
    pub auth_url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub success: bool,
    pub user_id: Option<i64>,
    pub auth_url: Option<String>,
    pub message: Option<String>,
}

pub struct ConnectorClient {
    client: Client,
    settings: ConnectorSettings,
}

impl ConnectorClient {
    pub fn new(settings: ConnectorSettings) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    /// Serializes `payload` once and signs the result.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<SignedPayload, ConnectorError> {
        let secret = self.settings.secret().ok_or(ConnectorError::MissingSecret)?;
        let body = serde_json::to_vec(payload)?;
        let signature = sign_body(secret, &body).map_err(ConnectorError::Signing)?;

        Ok(SignedPayload { body, signature })
    }

    pub async fn create_user(
        &self,
        request: &CreateUserRequest,
    ) -> Result<CreateUserResponse, ConnectorError> {
        let signed = self.sign(request)?;
        let response: CreateUserResponse = self
            .post_signed("/create-user", Some(&request.shop), signed)
            .await?;

        if !response.success {
            return Err(ConnectorError::Unsuccessful(
                response
                    .message
                    .unwrap_or_else(|| "Connector API returned error".to_string()),
            ));
        }

        metrics::counter!(
            "shop_app_connector_users_total",
            "existing" => response.user_exists.to_string()
        )
        .increment(1);
        Ok(response)
    }

    pub async fn get_token(
        &self,
        email: &str,
        shop: Option<&str>,
    ) -> Result<TokenResponse, ConnectorError> {
        let signed = self.sign(&GetTokenRequest { email })?;
        let response: TokenResponse = self.post_signed("/get-token", shop, signed).await?;

        if !response.success {
            return Err(ConnectorError::Unsuccessful(
                response
                    .message
                    .unwrap_or_else(|| "Connector API returned error".to_string()),
            ));
        }
        Ok(response)
    }

    async fn post_signed<R: DeserializeOwned>(
        &self,
        path: &str,
        shop: Option<&str>,
        signed: SignedPayload,
    ) -> Result<R, ConnectorError> {
        let url = self.url(path);

        let mut request = self
            .client
            .traced_post(&url)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("Origin", &self.settings.app_origin)
            .header(HMAC_HEADER, &signed.signature);
        if let Some(shop) = shop {
            request = request.header(SHOP_DOMAIN_HEADER, shop);
        }

        let response = request.body(signed.body).send().await.map_err(|e| {
            tracing::error!("Failed to send POST request to {}: {}", url, e);
            ConnectorError::Transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Connector rejected request");
            return Err(ConnectorError::Rejected { status, body });
        }

        Ok(response.json::<R>().await?)
    }
}
