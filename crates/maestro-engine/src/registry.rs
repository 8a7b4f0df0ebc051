//! Process-root registry of shared execution components.
//!
//! One registry per process replaces hidden global singletons: it owns the
//! resource caches, the request throttler, and the external ports, and its
//! `shutdown` releases leases and flushes caches explicitly.

use std::sync::Arc;
use tracing::info;

use maestro_agents::{
    AgentDefinition, AgentLoader, ElicitationManager, ElicitationSession, TemplateResolver,
};
use maestro_core::config::{CacheConfig, EngineConfig, ThrottleConfig};
use maestro_core::{InMemoryNotifier, KeyValueStore, LlmProvider, NotificationPort};
use maestro_infra::cache::ResourceCacheConfig;
use maestro_infra::{AiRequestThrottler, InMemoryKeyValueStore, ResourceCache};

use crate::store::{CheckpointStore, InMemoryCheckpointStore, InMemoryWorkflowStore, WorkflowStore};
use crate::{EngineError, Result};

/// Shared, process-wide execution components, dependency-injected.
#[derive(Clone)]
pub struct EngineRegistry {
    engine_config: EngineConfig,
    store: Arc<dyn WorkflowStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    loader: Arc<dyn AgentLoader>,
    provider: Arc<dyn LlmProvider>,
    notifier: Arc<dyn NotificationPort>,
    throttler: Arc<AiRequestThrottler>,
    resolver: Arc<TemplateResolver>,
    elicitation: Arc<ElicitationManager>,
    sessions: Arc<ResourceCache<ElicitationSession>>,
    agents: Arc<ResourceCache<AgentDefinition>>,
}

impl EngineRegistry {
    pub fn builder() -> EngineRegistryBuilder {
        EngineRegistryBuilder::new()
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    pub fn store(&self) -> Arc<dyn WorkflowStore> {
        Arc::clone(&self.store)
    }

    pub fn checkpoints(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.checkpoints)
    }

    pub fn loader(&self) -> Arc<dyn AgentLoader> {
        Arc::clone(&self.loader)
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }

    pub fn notifier(&self) -> Arc<dyn NotificationPort> {
        Arc::clone(&self.notifier)
    }

    pub fn throttler(&self) -> Arc<AiRequestThrottler> {
        Arc::clone(&self.throttler)
    }

    pub fn resolver(&self) -> Arc<TemplateResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn elicitation(&self) -> Arc<ElicitationManager> {
        Arc::clone(&self.elicitation)
    }

    pub fn sessions(&self) -> Arc<ResourceCache<ElicitationSession>> {
        Arc::clone(&self.sessions)
    }

    pub fn agents(&self) -> Arc<ResourceCache<AgentDefinition>> {
        Arc::clone(&self.agents)
    }

    /// Release outstanding leases and flush caches. Call once, when the
    /// process is going away.
    pub async fn shutdown(&self) {
        info!("Shutting down engine registry");
        self.throttler.shutdown().await;
        self.sessions.invalidate_all();
        self.agents.invalidate_all();
        self.resolver.reload_all();
    }
}

/// Builder for [`EngineRegistry`]. The loader and provider are required;
/// everything else defaults to in-memory implementations.
pub struct EngineRegistryBuilder {
    engine_config: EngineConfig,
    throttle_config: ThrottleConfig,
    cache_config: CacheConfig,
    store: Option<Arc<dyn WorkflowStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    loader: Option<Arc<dyn AgentLoader>>,
    provider: Option<Arc<dyn LlmProvider>>,
    notifier: Option<Arc<dyn NotificationPort>>,
    kv: Option<Arc<dyn KeyValueStore>>,
}

impl Default for EngineRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistryBuilder {
    pub fn new() -> Self {
        Self {
            engine_config: EngineConfig::default(),
            throttle_config: ThrottleConfig::default(),
            cache_config: CacheConfig::default(),
            store: None,
            checkpoints: None,
            loader: None,
            provider: None,
            notifier: None,
            kv: None,
        }
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn throttle_config(mut self, config: ThrottleConfig) -> Self {
        self.throttle_config = config;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn agent_loader(mut self, loader: Arc<dyn AgentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn llm_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn notification_port(mut self, notifier: Arc<dyn NotificationPort>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn key_value_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn build(self) -> Result<EngineRegistry> {
        let loader = self
            .loader
            .ok_or_else(|| EngineError::Configuration("an agent loader is required".to_string()))?;
        let provider = self
            .provider
            .ok_or_else(|| EngineError::Configuration("an LLM provider is required".to_string()))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryWorkflowStore::new()));
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(InMemoryNotifier::new()));
        let kv = self
            .kv
            .unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()));

        let throttler = Arc::new(AiRequestThrottler::new(kv, self.throttle_config));
        let resolver = Arc::new(TemplateResolver::new(Arc::clone(&loader)));
        let elicitation = Arc::new(ElicitationManager::new(self.engine_config.max_questions));

        let cache_config = ResourceCacheConfig::new(self.cache_config.max_idle())
            .with_sweep_interval(self.cache_config.sweep_interval());
        let sessions = Arc::new(ResourceCache::new(cache_config.clone()));
        let agents = Arc::new(ResourceCache::new(cache_config));

        Ok(EngineRegistry {
            engine_config: self.engine_config,
            store,
            checkpoints,
            loader,
            provider,
            notifier,
            throttler,
            resolver,
            elicitation,
            sessions,
            agents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_agents::StaticAgentLoader;
    use maestro_core::{Completion, CompletionRequest, LlmError};

    struct NullProvider;

    #[async_trait]
    impl LlmProvider for NullProvider {
        async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<Completion, LlmError> {
            Ok(Completion::new("ok", "null"))
        }
    }

    #[tokio::test]
    async fn test_build_requires_loader_and_provider() {
        let result = EngineRegistry::builder().build();
        assert!(matches!(result, Err(EngineError::Configuration(_))));

        let result = EngineRegistry::builder()
            .agent_loader(StaticAgentLoader::new().into_shared())
            .llm_provider(Arc::new(NullProvider))
            .build();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_caches() {
        let registry = EngineRegistry::builder()
            .agent_loader(StaticAgentLoader::new().into_shared())
            .llm_provider(Arc::new(NullProvider))
            .build()
            .unwrap();

        registry.agents().insert(
            "pm",
            maestro_agents::AgentDefinition {
                id: "pm".to_string(),
                name: "John".to_string(),
                title: "PM".to_string(),
                persona: maestro_agents::Persona {
                    role: "PM".to_string(),
                    style: "direct".to_string(),
                    identity: "a PM".to_string(),
                    focus: "docs".to_string(),
                    principles: vec![],
                },
                commands: vec![],
                dependencies: Default::default(),
            },
        );
        assert_eq!(registry.agents().len(), 1);

        registry.shutdown().await;
        assert!(registry.agents().is_empty());
    }
}
