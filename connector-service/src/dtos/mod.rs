pub mod connector;

pub use connector::{ProvisionRequest, ProvisionResponse, TokenRequest, TokenResponse};

use serde::Serialize;
use utoipa::ToSchema;

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}
