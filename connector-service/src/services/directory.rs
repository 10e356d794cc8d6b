use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::{Account, AccountId, AccountRole, NewAccount};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("An account with email {0} already exists")]
    Conflict(String),

    #[error("Directory backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        DirectoryError::Backend(err.to_string())
    }
}

/// The account store the connector calls into. Lookups by email are
/// case-insensitive and new accounts get the subscriber role.
///
/// Attribute writes for one account must be observed in order: a reader
/// that sees a new token value must also see the expiry written before it.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError>;

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, DirectoryError>;

    /// Fails with [`DirectoryError::Conflict`] when the email is taken.
    async fn create_account(&self, new: NewAccount) -> Result<Account, DirectoryError>;

    async fn set_attribute(
        &self,
        id: AccountId,
        key: &str,
        value: &str,
    ) -> Result<(), DirectoryError>;

    async fn get_attribute(&self, id: AccountId, key: &str)
        -> Result<Option<String>, DirectoryError>;

    async fn health_check(&self) -> Result<(), DirectoryError>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    next_id: AccountId,
    accounts: HashMap<AccountId, Account>,
    by_email: HashMap<String, AccountId>,
    attributes: HashMap<(AccountId, String), String>,
}

/// Process-local directory. One lock guards everything, so every operation
/// is serializable and ids are handed out from 1 upwards.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DirectoryState>, DirectoryError> {
        self.state
            .lock()
            .map_err(|_| DirectoryError::Backend("directory lock poisoned".to_string()))
    }

    /// Adds an account that was created outside the connector, keeping its
    /// id and role as given.
    pub fn import(&self, account: Account) -> Result<(), DirectoryError> {
        let mut state = self.lock()?;
        let key = email_key(&account.email);
        if state.by_email.contains_key(&key) || state.accounts.contains_key(&account.account_id) {
            return Err(DirectoryError::Conflict(account.email));
        }

        state.next_id = state.next_id.max(account.account_id);
        state.by_email.insert(key, account.account_id);
        state.accounts.insert(account.account_id, account);
        Ok(())
    }

    pub fn account_count(&self) -> usize {
        self.lock().map(|s| s.accounts.len()).unwrap_or(0)
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError> {
        let state = self.lock()?;
        Ok(state
            .by_email
            .get(&email_key(email))
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, DirectoryError> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, DirectoryError> {
        let mut state = self.lock()?;
        let key = email_key(&new.email);
        if state.by_email.contains_key(&key) {
            return Err(DirectoryError::Conflict(new.email));
        }

        state.next_id += 1;
        let account = Account {
            account_id: state.next_id,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            role: AccountRole::Subscriber,
            created_utc: Utc::now(),
        };
        state.by_email.insert(key, account.account_id);
        state.accounts.insert(account.account_id, account.clone());

        Ok(account)
    }

    async fn set_attribute(
        &self,
        id: AccountId,
        key: &str,
        value: &str,
    ) -> Result<(), DirectoryError> {
        let mut state = self.lock()?;
        if !state.accounts.contains_key(&id) {
            return Err(DirectoryError::Backend(format!("account {} does not exist", id)));
        }
        state
            .attributes
            .insert((id, key.to_string()), value.to_string());
        Ok(())
    }

    async fn get_attribute(
        &self,
        id: AccountId,
        key: &str,
    ) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .lock()?
            .attributes
            .get(&(id, key.to_string()))
            .cloned())
    }

    async fn health_check(&self) -> Result<(), DirectoryError> {
        self.lock().map(|_| ())
    }
}
