use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Counter, KeyValueStore, StoreError};
use crate::clock::{Clock, SystemClock};

/// Expired keys are swept once the map grows past this many entries.
const DEFAULT_PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store. Each key lives in one dashmap shard, so an increment
/// holds that shard's lock for the whole read-modify-write.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    purge_threshold: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            purge_threshold: DEFAULT_PURGE_THRESHOLD,
        }
    }

    pub fn with_purge_threshold(mut self, threshold: usize) -> Self {
        self.purge_threshold = threshold.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired key.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| StoreError::Backend(format!("ttl out of range: {:?}", ttl)))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = match ttl {
            Some(ttl) => Some(Self::expiry_from(self.clock.now(), ttl)?),
            None => None,
        };
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        if self.entries.len() > self.purge_threshold {
            self.purge_expired();
        }

        let now = self.clock.now();
        let fresh_expiry = Self::expiry_from(now, ttl)?;

        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: Some(fresh_expiry),
        });

        if slot.is_expired(now) {
            *slot = Entry {
                value: "0".to_string(),
                expires_at: Some(fresh_expiry),
            };
        }

        let count = slot
            .value
            .parse::<u64>()
            .map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
            })?
            .saturating_add(1);
        slot.value = count.to_string();

        let expires_at = *slot.expires_at.get_or_insert(fresh_expiry);
        let expires_in = (expires_at - now).to_std().unwrap_or(Duration::ZERO);

        Ok(Counter { count, expires_in })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn increment_starts_at_one_and_keeps_first_expiry() {
        let (store, clock) = store();
        let ttl = Duration::from_secs(60);

        let first = store.increment("k", ttl).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.expires_in, ttl);

        clock.advance(chrono::Duration::seconds(20));
        let second = store.increment("k", ttl).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.expires_in, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn counter_resets_after_expiry() {
        let (store, clock) = store();
        let ttl = Duration::from_secs(60);

        for _ in 0..5 {
            store.increment("k", ttl).await.unwrap();
        }
        clock.advance(chrono::Duration::seconds(60));

        let after = store.increment("k", ttl).await.unwrap();
        assert_eq!(after.count, 1);
    }

    #[tokio::test]
    async fn get_and_set_respect_ttl() {
        let (store, clock) = store();
        store
            .set("session", "abc", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        store.set("pinned", "xyz", None).await.unwrap();

        assert_eq!(store.get("session").await.unwrap().as_deref(), Some("abc"));

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(store.get("session").await.unwrap(), None);
        assert_eq!(store.get("pinned").await.unwrap().as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn increment_rejects_non_counter_values() {
        let (store, _clock) = store();
        store.set("k", "not-a-number", None).await.unwrap();

        let err = store
            .increment("k", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_keys() {
        let (store, clock) = store();
        store
            .set("short", "1", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("long", "1", None).await.unwrap();

        clock.advance(chrono::Duration::seconds(2));
        store.purge_expired();

        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment("shared", Duration::from_secs(60))
                    .await
                    .unwrap()
                    .count
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }
}
