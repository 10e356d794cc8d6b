use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = i64;

/// Role recorded on the directory account. The directory is shared with other
/// tooling, so any role it already holds is carried through untouched; the
/// connector only ever assigns `Subscriber` when it creates an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccountRole {
    Subscriber,
    Other(String),
}

impl AccountRole {
    pub fn as_str(&self) -> &str {
        match self {
            AccountRole::Subscriber => "subscriber",
            AccountRole::Other(role) => role,
        }
    }
}

impl From<String> for AccountRole {
    fn from(role: String) -> Self {
        if role == "subscriber" {
            AccountRole::Subscriber
        } else {
            AccountRole::Other(role)
        }
    }
}

impl From<AccountRole> for String {
    fn from(role: AccountRole) -> Self {
        role.as_str().to_string()
    }
}

/// Account as the directory stores it. The connector never owns it; it only
/// looks it up, creates it, and hangs attributes off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Account {
    pub account_id: AccountId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[schema(value_type = String)]
    pub role: AccountRole,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(first: &str, last: &str) -> Account {
        Account {
            account_id: 1,
            email: "a@x.com".into(),
            first_name: first.into(),
            last_name: last.into(),
            role: AccountRole::Subscriber,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn display_name_falls_back_to_email() {
        assert_eq!(account("Ada", "Lovelace").display_name(), "Ada Lovelace");
        assert_eq!(account("Ada", "").display_name(), "Ada");
        assert_eq!(account("", "").display_name(), "a@x.com");
    }

    #[test]
    fn foreign_roles_are_kept_verbatim() {
        assert_eq!(
            AccountRole::from("subscriber".to_string()),
            AccountRole::Subscriber
        );

        let admin = AccountRole::from("administrator".to_string());
        assert_eq!(admin, AccountRole::Other("administrator".into()));
        assert_eq!(admin.as_str(), "administrator");
        assert_eq!(
            serde_json::to_value(&admin).unwrap(),
            serde_json::json!("administrator")
        );
    }
}
