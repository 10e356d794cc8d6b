use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use std::time::Duration;

use super::{Counter, KeyValueStore, StoreError};

/// INCR + PEXPIRE + PTTL in one round trip so concurrent callers never see
/// a counter without an expiry.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
";

#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    manager: ConnectionManager,
    increment: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url).map_err(backend)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            backend(e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        cmd.query_async(&mut conn).await.map_err(backend)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let mut conn = self.manager.clone();
        let (count, remaining_ms): (i64, i64) = self
            .increment
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| match e.kind() {
                redis::ErrorKind::ResponseError => StoreError::Corrupt {
                    key: key.to_string(),
                },
                _ => backend(e),
            })?;

        Ok(Counter {
            count: u64::try_from(count).map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
            })?,
            expires_in: Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0)),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("Redis health check failed: {}", e)))
    }
}
