use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Wire form of a login token: base64 of this JSON object, fields in this
/// order. Issuer and redeemer both depend on the exact shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPayload {
    pub user_id: AccountId,
    pub email: String,
    /// Unix seconds.
    pub expires: i64,
    pub nonce: String,
}

impl TokenPayload {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }
}

/// A presented token after decoding. Fields are optional so a structurally
/// valid but incomplete token can be told apart from garbage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DecodedToken {
    pub user_id: Option<AccountId>,
    pub email: Option<String>,
    pub expires: Option<i64>,
    pub nonce: Option<String>,
}

impl DecodedToken {
    /// `None` when the string is not base64 of a JSON object.
    pub fn decode(opaque: &str) -> Option<Self> {
        let bytes = STANDARD.decode(opaque.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub account_id: AccountId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    pub encoded: String,
}

/// Per-account token lifecycle as seen from the stored attributes.
///
/// Issuing always moves to `Issued`, superseding whatever was stored.
/// `Redeemed` is only reachable when single-use tokens are enabled;
/// otherwise a redeemed token stays `Issued` until it expires or is
/// superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Issued { expires_at: DateTime<Utc> },
    Redeemed { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
}
