//! Key-value store used for cross-request counters.
//!
//! The rate limiter is written against [`KeyValueStore`] so it runs the same
//! way over the in-process [`MemoryStore`] and a shared [`RedisStore`].

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("value stored under '{key}' is not a counter")]
    Corrupt { key: String },
}

/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Time left until the counter disappears.
    pub expires_in: Duration,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomically increments the counter under `key`. A missing or expired
    /// key starts at 1 and lives for `ttl`; later increments keep the
    /// original expiry.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
