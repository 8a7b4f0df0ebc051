//! Shared key-value store abstraction.
//!
//! Used by the request throttler for leases and rate-limit timestamps so
//! that correctness holds across multiple engine processes, not just one.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Key-value store with expiring keys.
///
/// Implementations must make `set_nx` atomic: it is the acquire operation
/// for time-bounded leases.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key, `None` if absent or expired.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Set a value, optionally with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;

    /// Set a value only if the key does not already exist. Returns `true`
    /// when the key was set (the lease was acquired).
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<bool>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> KvResult<()>;
}
