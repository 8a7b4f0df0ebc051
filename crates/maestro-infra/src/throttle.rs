//! Fair, rate-limited access to the AI completion provider.
//!
//! Every provider call for a tenant is serialized behind a lease key with a
//! TTL, and spaced by a minimum interval since the tenant's last completed
//! call. Both live in the shared key-value store so the guarantees hold
//! across engine processes. Contention is handled by bounded, jittered
//! polling; the lease TTL bounds the damage of a crashed holder.

use dashmap::DashSet;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use maestro_core::config::ThrottleConfig;
use maestro_core::kv::KeyValueStore;
use maestro_core::TenantId;

use crate::{InfraError, Result};

/// Per-tenant serialization and minimum-interval rate limiting of provider
/// calls.
pub struct AiRequestThrottler {
    store: Arc<dyn KeyValueStore>,
    config: ThrottleConfig,
    /// Tenants this process has throttled, for shutdown-time lease release
    seen_tenants: DashSet<String>,
}

impl AiRequestThrottler {
    pub fn new(store: Arc<dyn KeyValueStore>, config: ThrottleConfig) -> Self {
        Self {
            store,
            config,
            seen_tenants: DashSet::new(),
        }
    }

    /// Run `request_fn` under the tenant's lease and rate limit.
    ///
    /// The outer `Result` carries throttling/store failures; the inner one
    /// is whatever the request itself returned. The lease is released on
    /// every path, and the last-processed timestamp advances only when the
    /// request succeeded.
    pub async fn enqueue<F, Fut, T, E>(
        &self,
        tenant: &TenantId,
        request_fn: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let tenant_key = tenant.to_string();
        self.seen_tenants.insert(tenant_key.clone());

        // Cheap pre-check so we do not hold the lease while obviously early.
        self.wait_for_interval(&tenant_key).await?;
        self.acquire_lease(&tenant_key).await?;
        // The interval is re-checked under the lease: another process may
        // have completed a call between our pre-check and the acquire.
        if let Err(e) = self.wait_for_interval(&tenant_key).await {
            self.release_lease(&tenant_key).await;
            return Err(e);
        }

        debug!(tenant = %tenant_key, "Dispatching provider request");
        let result = request_fn().await;

        self.release_lease(&tenant_key).await;

        if result.is_ok() {
            let now = chrono::Utc::now().timestamp_millis().to_string();
            if let Err(e) = self.store.set(&last_key(&tenant_key), &now, None).await {
                warn!(tenant = %tenant_key, error = %e, "Failed to record last-processed timestamp");
            }
        }

        Ok(result)
    }

    /// Drop the tenant's lease and rate-limit keys (workflow completion).
    pub async fn release_tenant(&self, tenant: &TenantId) -> Result<()> {
        let tenant_key = tenant.to_string();
        self.store.delete(&lease_key(&tenant_key)).await?;
        self.store.delete(&last_key(&tenant_key)).await?;
        self.seen_tenants.remove(&tenant_key);
        Ok(())
    }

    /// Release every lease this process may still hold.
    pub async fn shutdown(&self) {
        let tenants: Vec<String> = self.seen_tenants.iter().map(|t| t.key().clone()).collect();
        for tenant_key in tenants {
            if let Err(e) = self.store.delete(&lease_key(&tenant_key)).await {
                warn!(tenant = %tenant_key, error = %e, "Failed to release lease at shutdown");
            }
            self.seen_tenants.remove(&tenant_key);
        }
    }

    async fn wait_for_interval(&self, tenant_key: &str) -> Result<()> {
        let min_interval = self.config.min_interval();
        if min_interval.is_zero() {
            return Ok(());
        }

        loop {
            let last = self
                .store
                .get(&last_key(tenant_key))
                .await?
                .and_then(|raw| raw.parse::<i64>().ok());

            let Some(last_ms) = last else {
                return Ok(());
            };

            let elapsed_ms = chrono::Utc::now().timestamp_millis().saturating_sub(last_ms);
            if elapsed_ms < 0 {
                // Clock skew across processes; treat as satisfied.
                return Ok(());
            }
            let elapsed = Duration::from_millis(elapsed_ms as u64);
            if elapsed >= min_interval {
                return Ok(());
            }

            let remaining = min_interval - elapsed;
            debug!(tenant = %tenant_key, ?remaining, "Rate limit: waiting for minimum interval");
            tokio::time::sleep(remaining).await;
        }
    }

    async fn acquire_lease(&self, tenant_key: &str) -> Result<()> {
        let key = lease_key(tenant_key);
        let ttl = Some(self.config.lease_ttl());

        for attempt in 0..self.config.max_lease_attempts {
            if self.store.set_nx(&key, "held", ttl).await? {
                debug!(tenant = %tenant_key, attempt, "Lease acquired");
                return Ok(());
            }

            debug!(tenant = %tenant_key, attempt, "Lease contended, waiting");
            tokio::time::sleep(self.contention_wait()).await;
        }

        Err(InfraError::LeaseUnavailable(tenant_key.to_string()))
    }

    async fn release_lease(&self, tenant_key: &str) {
        // Best effort; an unreleased lease expires with its TTL.
        if let Err(e) = self.store.delete(&lease_key(tenant_key)).await {
            warn!(tenant = %tenant_key, error = %e, "Failed to release lease");
        }
    }

    /// One interval plus up to 30% jitter, so contending callers spread out.
    fn contention_wait(&self) -> Duration {
        let base = self.config.min_interval().max(Duration::from_millis(10));
        let jitter = rand::thread_rng().gen_range(0.0..0.3);
        base.mul_f64(1.0 + jitter)
    }
}

fn lease_key(tenant_key: &str) -> String {
    format!("throttle:lease:{}", tenant_key)
}

fn last_key(tenant_key: &str) -> String {
    format!("throttle:last:{}", tenant_key)
}
