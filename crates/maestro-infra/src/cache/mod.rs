//! Bounded-lifetime resource caching.

pub mod manager;

pub use manager::{ResourceCache, ResourceCacheConfig};
