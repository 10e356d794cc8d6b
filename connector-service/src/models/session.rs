use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use tower_sessions::Session;

use super::{Account, AccountId};

const ACCOUNT_ID_KEY: &str = "account_id";
const EMAIL_KEY: &str = "email";

/// The account bound to the current browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAccount {
    pub account_id: AccountId,
    pub email: String,
}

impl SessionAccount {
    /// Binds `account` to the session. The session id is cycled first so a
    /// pre-existing (possibly planted) id is never upgraded to logged in.
    pub async fn establish(
        session: &Session,
        account: &Account,
    ) -> Result<Self, tower_sessions::session::Error> {
        session.cycle_id().await?;
        session.insert(ACCOUNT_ID_KEY, account.account_id).await?;
        session.insert(EMAIL_KEY, &account.email).await?;

        Ok(Self {
            account_id: account.account_id,
            email: account.email.clone(),
        })
    }

    pub async fn load(session: &Session) -> Result<Option<Self>, tower_sessions::session::Error> {
        let account_id: Option<AccountId> = session.get(ACCOUNT_ID_KEY).await?;
        let email: Option<String> = session.get(EMAIL_KEY).await?;

        Ok(match (account_id, email) {
            (Some(account_id), Some(email)) => Some(Self { account_id, email }),
            _ => None,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionAccount
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;

        match SessionAccount::load(&session).await {
            Ok(Some(account)) => Ok(account),
            Ok(None) => Err((StatusCode::UNAUTHORIZED, "Not signed in")),
            Err(e) => {
                tracing::error!("Failed to read session: {}", e);
                Err((StatusCode::INTERNAL_SERVER_ERROR, "Session unavailable"))
            }
        }
    }
}
