//! Bounded-lifetime cache for parsed definitions and per-workflow state.
//!
//! Entries carry an access timestamp; `sweep` reclaims entries idle beyond
//! a configurable max age so that a long-lived process serving many tenant
//! workflows does not grow without bound. Static definitions survive
//! indefinitely in practice because they keep being re-accessed.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for a resource cache.
#[derive(Debug, Clone)]
pub struct ResourceCacheConfig {
    /// Entries idle longer than this are removed by sweep
    pub max_idle: Duration,
    /// Interval of the background sweeper task, if spawned
    pub sweep_interval: Duration,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(86_400), // 24 hours
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl ResourceCacheConfig {
    pub fn new(max_idle: Duration) -> Self {
        Self {
            max_idle,
            ..Default::default()
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

/// Process-wide cache of loadable values with idle-based reclamation.
pub struct ResourceCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    config: ResourceCacheConfig,
}

impl<V: Clone + Send + Sync + 'static> ResourceCache<V> {
    pub fn new(config: ResourceCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Create with default configuration (24h max idle).
    pub fn default_config() -> Self {
        Self::new(ResourceCacheConfig::default())
    }

    /// Get a value, refreshing its access timestamp.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get_mut(key).map(|mut entry| {
            entry.last_access = Instant::now();
            entry.value.clone()
        })
    }

    /// Insert a value, overwriting any previous entry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Get a value, running the loader on a miss.
    ///
    /// Concurrent misses for the same key may run the loader more than once;
    /// last write wins. The cached populations here (parsed definitions,
    /// per-workflow working state) tolerate that.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            debug!(key = %key, "Resource cache hit");
            return Ok(value);
        }

        debug!(key = %key, "Resource cache miss, loading");
        let value = loader().await?;
        self.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Remove a single entry.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove all entries.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Remove entries idle beyond the configured max age. Returns how many
    /// entries were reclaimed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let max_idle = self.config.max_idle;
        self.entries
            .retain(|_, entry| entry.last_access.elapsed() <= max_idle);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Resource cache sweep reclaimed idle entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a background task that sweeps on the configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = cache.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                cache.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_lived() -> ResourceCache<String> {
        ResourceCache::new(ResourceCacheConfig::new(Duration::from_millis(60)))
    }

    #[tokio::test]
    async fn test_get_or_load_caches() {
        let cache = short_lived();
        let mut loads = 0;

        for _ in 0..3 {
            let value: Result<String, std::convert::Infallible> = cache
                .get_or_load("prd", || {
                    loads += 1;
                    async { Ok("template body".to_string()) }
                })
                .await;
            assert_eq!(value.unwrap(), "template body");
        }

        assert_eq!(loads, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_loader_error_not_cached() {
        let cache: ResourceCache<String> = short_lived();

        let result: Result<String, String> = cache
            .get_or_load("broken", || async { Err("load failed".to_string()) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_entries() {
        let cache = short_lived();
        cache.insert("stale", "old".to_string());

        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.insert("fresh", "new".to_string());

        let removed = cache.sweep();
        assert_eq!(removed, 1);
        assert!(cache.get("stale").is_none());
        assert!(cache.get("fresh").is_some());
    }

    #[tokio::test]
    async fn test_access_refreshes_idle_clock() {
        let cache = short_lived();
        cache.insert("active", "value".to_string());

        // Keep touching the entry past its max idle age.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(cache.get("active").is_some());
        }

        assert_eq!(cache.sweep(), 0);
        assert!(cache.get("active").is_some());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = short_lived();
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
