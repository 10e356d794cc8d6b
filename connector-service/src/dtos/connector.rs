use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::AccountId;
use crate::services::ProvisionOutcome;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    #[schema(example = "merchant@example.com")]
    pub email: Option<String>,
    #[serde(default)]
    #[schema(example = "demo.myshopify.com")]
    pub shop: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    pub success: bool,
    pub user_exists: bool,
    pub user_id: AccountId,
    pub email: String,
    pub auth_url: String,
    pub message: String,
}

impl From<ProvisionOutcome> for ProvisionResponse {
    fn from(outcome: ProvisionOutcome) -> Self {
        Self {
            success: true,
            user_exists: !outcome.created,
            user_id: outcome.account.account_id,
            email: outcome.account.email,
            auth_url: outcome.auth_url,
            message: if outcome.created {
                "User created successfully".to_string()
            } else {
                "User already exists".to_string()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub success: bool,
    pub user_id: AccountId,
    pub email: String,
    pub auth_url: String,
    pub message: String,
}
