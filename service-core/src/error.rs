use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Message returned for every authentication rejection. The concrete
/// reason (bad MAC, missing header, disallowed origin) is only logged.
pub const GENERIC_AUTH_REJECTION: &str = "Request could not be authenticated";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Authentication(anyhow::Error),

    #[error("Too many requests")]
    RateLimited { retry_after: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(anyhow::Error),

    #[error("Authentication token has expired")]
    TokenExpired,

    #[error("Invalid authentication token: {0}")]
    TokenInvalid(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TokenExpired | AppError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) | AppError::ConfigError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message that is safe to show to the caller or the browser.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::Authentication(_) => GENERIC_AUTH_REJECTION.to_string(),
            AppError::RateLimited { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            AppError::TokenExpired => "Authentication token has expired".to_string(),
            AppError::TokenInvalid(_) => "Invalid authentication token".to_string(),
            AppError::Upstream(_) => "Upstream service error".to_string(),
            AppError::ConfigError(_) => "Configuration error".to_string(),
            AppError::InternalError(_) => "Internal server error".to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Upstream(anyhow::Error::new(err))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Upstream(err) => {
                tracing::error!(error = ?err, "Upstream failure");
            }
            AppError::ConfigError(err) | AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal failure");
            }
            _ => {}
        }

        let status = self.status();
        let retry_after = match &self {
            AppError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };

        let mut res = (
            status,
            Json(ErrorBody {
                success: false,
                message: self.public_message(),
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}
