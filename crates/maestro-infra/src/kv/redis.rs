//! Redis-backed key-value store.
//!
//! Leases and rate-limit timestamps live here so that throttling
//! correctness holds across multiple engine processes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{debug, info};

use maestro_core::config::RedisConfig;
use maestro_core::kv::{KeyValueStore, KvError, KvResult};

use crate::Result;

/// `KeyValueStore` implementation over a shared Redis instance.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisKeyValueStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        info!("Connecting to Redis at {}", config.url);

        let client = Client::open(config.url.clone())?;
        let connection = ConnectionManager::new(client).await?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing Redis health check");

        let mut conn = self.connection.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(())
    }
}

fn backend(e: redis::RedisError) -> KvError {
    KvError::Backend(e.to_string())
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let full_key = self.make_key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = redis::cmd("GET")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        let full_key = self.make_key(key);
        debug!("Setting key: {} with TTL: {:?}", full_key, ttl);

        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(backend)?;

        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<bool> {
        let full_key = self.make_key(key);
        debug!("Acquiring key: {} with TTL: {:?}", full_key, ttl);

        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }

        // SET ... NX answers OK when the key was set, nil when it existed.
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(backend)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let full_key = self.make_key(key);
        debug!("Deleting key: {}", full_key);

        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Key construction is testable without a live Redis instance.
    fn make_key_with_prefix(prefix: &str, key: &str) -> String {
        format!("{}{}", prefix, key)
    }

    #[test]
    fn test_make_key_with_prefix() {
        assert_eq!(
            make_key_with_prefix("maestro:", "throttle:lease:t1"),
            "maestro:throttle:lease:t1"
        );
    }

    #[test]
    fn test_make_key_empty_prefix() {
        assert_eq!(make_key_with_prefix("", "session"), "session");
    }
}
