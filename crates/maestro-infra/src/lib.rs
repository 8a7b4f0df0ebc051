pub mod cache;
pub mod kv;
pub mod throttle;

pub use cache::{ResourceCache, ResourceCacheConfig};
pub use kv::memory::InMemoryKeyValueStore;
pub use kv::redis::RedisKeyValueStore;
pub use throttle::AiRequestThrottler;

use maestro_core::kv::KvError;

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Key-value error: {0}")]
    Kv(#[from] KvError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lease unavailable for tenant {0}")]
    LeaseUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;
