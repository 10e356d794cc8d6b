//! Login token issuance and redemption.
//!
//! A token is base64 of `{user_id, email, expires, nonce}`. The current
//! token and its expiry are stored as account attributes; issuing again
//! overwrites them, which silently invalidates the previous token.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use service_core::clock::Clock;
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::directory::{DirectoryError, UserDirectory};
use super::error::ServiceError;
use crate::models::{Account, AccountId, AuthToken, DecodedToken, TokenPayload, TokenState};

pub const TOKEN_ATTRIBUTE: &str = "connector_auth_token";
pub const EXPIRES_ATTRIBUTE: &str = "connector_auth_expires";
pub const REDEEMED_ATTRIBUTE: &str = "connector_auth_redeemed";

/// Query parameter that carries a token on a redemption visit.
pub const TOKEN_QUERY_PARAM: &str = "auth_token";

const NONCE_SALT_BYTES: usize = 6;
const NONCE_TAG_HEX_LEN: usize = 20;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum RedemptionError {
    #[error("token is not valid base64 JSON")]
    Malformed,

    #[error("token lacks user_id or expires")]
    MissingFields,

    #[error("token expired at {0}")]
    Expired(i64),

    #[error("token nonce is not bound to its account")]
    NonceMismatch,

    #[error("token is not the current token for its account")]
    NotCurrent,

    #[error("token has already been redeemed")]
    AlreadyRedeemed,

    #[error("account {0} no longer exists")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl RedemptionError {
    /// Label for the redemption counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            RedemptionError::Malformed => "malformed",
            RedemptionError::MissingFields => "missing_fields",
            RedemptionError::Expired(_) => "expired",
            RedemptionError::NonceMismatch => "bad_nonce",
            RedemptionError::NotCurrent => "superseded",
            RedemptionError::AlreadyRedeemed => "replayed",
            RedemptionError::AccountNotFound(_) => "account_missing",
            RedemptionError::Directory(_) => "upstream_error",
        }
    }
}

impl From<RedemptionError> for AppError {
    fn from(err: RedemptionError) -> Self {
        match err {
            RedemptionError::Expired(_) => AppError::TokenExpired,
            RedemptionError::Directory(e) => AppError::from(e),
            other => AppError::TokenInvalid(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    nonce_secret: Secret<String>,
    ttl: Duration,
    site_url: String,
    single_use: bool,
}

impl TokenService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        nonce_secret: Secret<String>,
        ttl: Duration,
        site_url: &str,
    ) -> Self {
        Self {
            directory,
            clock,
            nonce_secret,
            ttl,
            site_url: site_url.trim_end_matches('/').to_string(),
            single_use: false,
        }
    }

    /// Reject a token once it has been redeemed instead of letting it be
    /// revisited until expiry or supersession.
    pub fn with_single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Redemption link for `token`.
    pub fn auth_url(&self, token: &AuthToken) -> String {
        format!(
            "{}/?{}={}",
            self.site_url,
            TOKEN_QUERY_PARAM,
            urlencoding::encode(&token.encoded)
        )
    }

    fn nonce_tag(&self, account_id: AccountId, salt: &str) -> Result<String, anyhow::Error> {
        let mut mac = HmacSha256::new_from_slice(self.nonce_secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid nonce key: {}", e))?;
        mac.update(format!("connector_auth_{}|{}", account_id, salt).as_bytes());
        let mut tag = hex::encode(mac.finalize().into_bytes());
        tag.truncate(NONCE_TAG_HEX_LEN);
        Ok(tag)
    }

    /// Fresh `<salt>.<tag>` nonce bound to `account_id`.
    pub fn create_nonce(&self, account_id: AccountId) -> Result<String, anyhow::Error> {
        let mut salt = [0u8; NONCE_SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let tag = self.nonce_tag(account_id, &salt)?;
        Ok(format!("{}.{}", salt, tag))
    }

    pub fn verify_nonce(&self, account_id: AccountId, nonce: &str) -> bool {
        let Some((salt, tag)) = nonce.split_once('.') else {
            return false;
        };
        if salt.len() != NONCE_SALT_BYTES * 2 || !salt.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }
        match self.nonce_tag(account_id, salt) {
            Ok(expected) => bool::from(expected.as_bytes().ct_eq(tag.as_bytes())),
            Err(e) => {
                tracing::error!("Nonce verification unavailable: {}", e);
                false
            }
        }
    }

    /// Mints a token for `account` and stores it as the account's current
    /// token, superseding any earlier one.
    pub async fn issue(&self, account: &Account) -> Result<AuthToken, ServiceError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow::anyhow!("Token expiry overflows for ttl {}", self.ttl))?;

        let payload = TokenPayload {
            user_id: account.account_id,
            email: account.email.clone(),
            expires: expires_at.timestamp(),
            nonce: self.create_nonce(account.account_id)?,
        };
        let encoded = payload
            .encode()
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))?;

        // expiry first: whoever can read the new token can read its expiry
        self.directory
            .set_attribute(
                account.account_id,
                EXPIRES_ATTRIBUTE,
                &payload.expires.to_string(),
            )
            .await?;
        self.directory
            .set_attribute(account.account_id, TOKEN_ATTRIBUTE, &encoded)
            .await?;

        metrics::counter!("connector_tokens_issued_total").increment(1);
        tracing::info!(account_id = account.account_id, "Issued login token");

        Ok(AuthToken {
            account_id: account.account_id,
            issued_at,
            expires_at: timestamp(payload.expires),
            nonce: payload.nonce,
            encoded,
        })
    }

    /// Validates a presented token and returns the account it is bound to.
    ///
    /// Gates run in order and the first failure wins: decode, required
    /// fields, expiry, nonce binding, match against the stored token,
    /// single-use marker, account lookup.
    pub async fn redeem(&self, presented: &str) -> Result<Account, RedemptionError> {
        let result = self.redeem_inner(presented).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        metrics::counter!("connector_token_redemptions_total", "outcome" => outcome).increment(1);

        result
    }

    async fn redeem_inner(&self, presented: &str) -> Result<Account, RedemptionError> {
        let decoded = DecodedToken::decode(presented).ok_or(RedemptionError::Malformed)?;

        let (Some(account_id), Some(expires)) = (decoded.user_id, decoded.expires) else {
            return Err(RedemptionError::MissingFields);
        };

        if self.clock.now().timestamp() > expires {
            tracing::info!(account_id, "Rejected expired login token");
            return Err(RedemptionError::Expired(expires));
        }

        let nonce = decoded.nonce.as_deref().unwrap_or_default();
        if !self.verify_nonce(account_id, nonce) {
            tracing::warn!(account_id, "Rejected login token with foreign nonce");
            return Err(RedemptionError::NonceMismatch);
        }

        let stored = self
            .directory
            .get_attribute(account_id, TOKEN_ATTRIBUTE)
            .await?
            .unwrap_or_default();
        if !bool::from(stored.as_bytes().ct_eq(presented.trim().as_bytes())) {
            tracing::warn!(account_id, "Rejected superseded or forged login token");
            return Err(RedemptionError::NotCurrent);
        }

        if self.single_use {
            let digest = token_digest(&stored);
            let redeemed = self
                .directory
                .get_attribute(account_id, REDEEMED_ATTRIBUTE)
                .await?;
            if redeemed.as_deref() == Some(digest.as_str()) {
                return Err(RedemptionError::AlreadyRedeemed);
            }
            // TODO: two visits racing between this read and the write below can both pass; needs a compare-and-set on the directory
            self.directory
                .set_attribute(account_id, REDEEMED_ATTRIBUTE, &digest)
                .await?;
        }

        let account = self
            .directory
            .find_by_id(account_id)
            .await?
            .ok_or(RedemptionError::AccountNotFound(account_id))?;

        tracing::info!(account_id, "Redeemed login token");
        Ok(account)
    }

    /// Where `account_id` sits in the token lifecycle right now.
    pub async fn token_state(&self, account_id: AccountId) -> Result<TokenState, DirectoryError> {
        let Some(token) = self
            .directory
            .get_attribute(account_id, TOKEN_ATTRIBUTE)
            .await?
        else {
            return Ok(TokenState::NoToken);
        };

        let expires = match self
            .directory
            .get_attribute(account_id, EXPIRES_ATTRIBUTE)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
        {
            Some(expires) => expires,
            None => match DecodedToken::decode(&token).and_then(|d| d.expires) {
                Some(expires) => expires,
                None => return Ok(TokenState::NoToken),
            },
        };
        let expires_at = timestamp(expires);

        if self.clock.now() > expires_at {
            return Ok(TokenState::Expired {
                expired_at: expires_at,
            });
        }

        if self.single_use {
            let redeemed = self
                .directory
                .get_attribute(account_id, REDEEMED_ATTRIBUTE)
                .await?;
            if redeemed.as_deref() == Some(token_digest(&token).as_str()) {
                return Ok(TokenState::Redeemed { expires_at });
            }
        }

        Ok(TokenState::Issued { expires_at })
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
