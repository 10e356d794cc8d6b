use std::sync::Arc;
use validator::ValidateEmail;

use super::directory::{DirectoryError, UserDirectory};
use super::error::ServiceError;
use super::token::TokenService;
use crate::dtos::ProvisionRequest;
use crate::models::{Account, AuthToken, NewAccount};

pub const LINKED_SHOP_ATTRIBUTE: &str = "linked_shop";

const MAX_NAME_CHARS: usize = 100;

/// Result of a provisioning call.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub account: Account,
    pub created: bool,
    pub token: AuthToken,
    pub auth_url: String,
}

/// Find-or-create for caller provisioning requests, followed by a fresh
/// login token.
#[derive(Clone)]
pub struct ProvisioningService {
    directory: Arc<dyn UserDirectory>,
    tokens: Arc<TokenService>,
}

#[derive(Debug, PartialEq)]
struct ValidatedRequest {
    email: String,
    shop: Option<String>,
    first_name: String,
    last_name: String,
}

impl ProvisioningService {
    pub fn new(directory: Arc<dyn UserDirectory>, tokens: Arc<TokenService>) -> Self {
        Self { directory, tokens }
    }

    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionOutcome, ServiceError> {
        let request = validate(request)?;

        let (account, created) = match self.directory.find_by_email(&request.email).await? {
            Some(account) => (account, false),
            None => self.create_or_adopt(&request).await?,
        };

        if let Some(shop) = &request.shop {
            self.directory
                .set_attribute(account.account_id, LINKED_SHOP_ATTRIBUTE, shop)
                .await?;
        }

        if created {
            metrics::counter!("connector_accounts_provisioned_total").increment(1);
            tracing::info!(
                account_id = account.account_id,
                shop = request.shop.as_deref().unwrap_or(""),
                "Provisioned new account"
            );
        } else {
            tracing::info!(account_id = account.account_id, "Account already exists");
        }

        let token = self.tokens.issue(&account).await?;
        let auth_url = self.tokens.auth_url(&token);

        Ok(ProvisionOutcome {
            account,
            created,
            token,
            auth_url,
        })
    }

    /// Creates the account; if a concurrent call created it first, the
    /// existing one is returned instead.
    async fn create_or_adopt(&self, request: &ValidatedRequest) -> Result<(Account, bool), ServiceError> {
        let new = NewAccount {
            email: request.email.clone(),
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
        };

        match self.directory.create_account(new).await {
            Ok(account) => Ok((account, true)),
            Err(DirectoryError::Conflict(_)) => {
                tracing::info!("Account created concurrently, using existing record");
                let account = self
                    .directory
                    .find_by_email(&request.email)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Internal(anyhow::anyhow!(
                            "account reported as existing but not found"
                        ))
                    })?;
                Ok((account, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh token for an existing account, without creating anything.
    pub async fn issue_for_email(
        &self,
        email: Option<&str>,
    ) -> Result<(Account, AuthToken, String), ServiceError> {
        let email = validate_email(email)?;

        let account = self
            .directory
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        let token = self.tokens.issue(&account).await?;
        let auth_url = self.tokens.auth_url(&token);
        Ok((account, token, auth_url))
    }
}

fn validate(request: ProvisionRequest) -> Result<ValidatedRequest, ServiceError> {
    let email = validate_email(request.email.as_deref())?;

    let shop = request
        .shop
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if is_valid_domain(s) {
                Ok(s.to_ascii_lowercase())
            } else {
                Err(ServiceError::Validation("Invalid shop domain".to_string()))
            }
        })
        .transpose()?;

    Ok(ValidatedRequest {
        email,
        shop,
        first_name: sanitize_text(request.first_name.as_deref()),
        last_name: sanitize_text(request.last_name.as_deref()),
    })
}

fn validate_email(email: Option<&str>) -> Result<String, ServiceError> {
    let email = email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ServiceError::Validation("Email is required".to_string()))?;

    let email = email.to_string();
    if !email.validate_email() {
        return Err(ServiceError::Validation("Invalid email format".to_string()));
    }

    Ok(email)
}

/// Hostname check: dot-separated labels of ASCII letters, digits and
/// inner hyphens, each at most 63 bytes, 253 bytes overall.
fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// Trims, drops control characters and angle brackets, caps the length.
fn sanitize_text(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control() && *c != '<' && *c != '>')
        .take(MAX_NAME_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}
