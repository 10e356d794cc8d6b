use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, FromRow};

use super::directory::{DirectoryError, UserDirectory};
use crate::db;
use crate::models::{Account, AccountId, AccountRole, NewAccount};

#[derive(Debug, FromRow)]
struct AccountRow {
    account_id: i64,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    created_utc: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            account_id: row.account_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            role: AccountRole::from(row.role),
            created_utc: row.created_utc,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "account_id, email, first_name, last_name, role, created_utc";

/// Directory backed by the `accounts` and `account_attributes` tables.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE LOWER(email) = LOWER($1)",
            ACCOUNT_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, DirectoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE account_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, DirectoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO accounts (email, first_name, last_name, role) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(AccountRole::Subscriber.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DirectoryError::Conflict(new.email.clone())
            } else {
                DirectoryError::from(e)
            }
        })?;

        Ok(Account::from(row))
    }

    async fn set_attribute(
        &self,
        id: AccountId,
        key: &str,
        value: &str,
    ) -> Result<(), DirectoryError> {
        sqlx::query(
            "INSERT INTO account_attributes (account_id, attr_key, attr_value, updated_utc) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (account_id, attr_key) \
             DO UPDATE SET attr_value = EXCLUDED.attr_value, updated_utc = NOW()",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_attribute(
        &self,
        id: AccountId,
        key: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let value: Option<(String,)> = sqlx::query_as(
            "SELECT attr_value FROM account_attributes WHERE account_id = $1 AND attr_key = $2",
        )
        .bind(id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(|(v,)| v))
    }

    async fn health_check(&self) -> Result<(), DirectoryError> {
        db::health_check(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    async fn directory() -> PgDirectory {
        let config = DatabaseConfig {
            url: std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/connector_test".to_string()),
            max_connections: 5,
            min_connections: 1,
        };
        let pool = db::create_pool(&config).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        PgDirectory::new(pool)
    }

    fn unique_email() -> String {
        format!("pg-{}@example.com", rand::random::<u64>())
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn create_then_find_case_insensitively() {
        let dir = directory().await;
        let email = unique_email();
        let created = dir
            .create_account(NewAccount {
                email: email.clone(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            })
            .await
            .unwrap();

        let found = dir
            .find_by_email(&email.to_uppercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.account_id, created.account_id);
        assert_eq!(found.role, AccountRole::Subscriber);

        let dup = dir
            .create_account(NewAccount {
                email: email.to_uppercase(),
                first_name: String::new(),
                last_name: String::new(),
            })
            .await;
        assert!(matches!(dup, Err(DirectoryError::Conflict(_))));
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn health_check_passes_after_migrations() {
        let dir = directory().await;
        assert!(dir.health_check().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn attribute_upsert_keeps_latest_value() {
        let dir = directory().await;
        let account = dir
            .create_account(NewAccount {
                email: unique_email(),
                first_name: String::new(),
                last_name: String::new(),
            })
            .await
            .unwrap();

        dir.set_attribute(account.account_id, "linked_shop", "a.myshopify.com")
            .await
            .unwrap();
        dir.set_attribute(account.account_id, "linked_shop", "b.myshopify.com")
            .await
            .unwrap();

        assert_eq!(
            dir.get_attribute(account.account_id, "linked_shop")
                .await
                .unwrap()
                .as_deref(),
            Some("b.myshopify.com")
        );
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn accounts_with_other_roles_are_readable() {
        let dir = directory().await;
        let email = unique_email();
        let created = dir
            .create_account(NewAccount {
                email: email.clone(),
                first_name: String::new(),
                last_name: String::new(),
            })
            .await
            .unwrap();

        sqlx::query("UPDATE accounts SET role = 'administrator' WHERE account_id = $1")
            .bind(created.account_id)
            .execute(dir.pool())
            .await
            .unwrap();

        let found = dir.find_by_email(&email).await.unwrap().unwrap();
        assert_eq!(found.role, AccountRole::Other("administrator".into()));
        let by_id = dir.find_by_id(created.account_id).await.unwrap().unwrap();
        assert_eq!(by_id.role.as_str(), "administrator");
    }
}
