use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub llm: LlmConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub throttle: ThrottleConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("MAESTRO")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("redis.url", "redis://localhost")?
            .set_default("redis.key_prefix", "maestro:")?
            .set_default("llm.provider", "anthropic")?
            .set_default("llm.model", "claude-3-sonnet-20240229")?
            .set_default("llm.api_key", "")?
            .set_default("llm.max_tokens", 4096)?
            .set_default("engine.checkpoints_enabled", true)?
            .set_default("engine.stale_running_secs", 900)?
            .set_default("engine.max_questions", 5)?
            .set_default("engine.default_agent", "pm")?
            .set_default("cache.max_idle_secs", 86_400)?
            .set_default("cache.sweep_interval_secs", 3600)?
            .set_default("throttle.min_interval_ms", 2000)?
            .set_default("throttle.lease_ttl_secs", 30)?
            .set_default("throttle.max_lease_attempts", 10)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("MAESTRO").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

/// Shared key-value store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            key_prefix: default_key_prefix(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: String) -> Self {
        self.key_prefix = prefix;
        self
    }
}

fn default_key_prefix() -> String {
    "maestro:".to_string()
}

/// AI provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl LlmConfig {
    pub fn new(provider: String, model: String, api_key: String) -> Self {
        Self {
            provider,
            model,
            api_key,
            max_tokens: default_max_tokens(),
            base_url: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

fn default_max_tokens() -> u32 {
    4096
}

/// Workflow engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Whether checkpoints are recorded on init and completion
    #[serde(default = "default_checkpoints_enabled")]
    pub checkpoints_enabled: bool,
    /// How long a workflow may sit in RUNNING before recovery considers it stale
    #[serde(default = "default_stale_running_secs")]
    pub stale_running_secs: u64,
    /// Cap on extracted elicitation questions per step
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
    /// Agent id assigned to template sections without an owner
    #[serde(default = "default_agent")]
    pub default_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoints_enabled: default_checkpoints_enabled(),
            stale_running_secs: default_stale_running_secs(),
            max_questions: default_max_questions(),
            default_agent: default_agent(),
        }
    }
}

impl EngineConfig {
    pub fn stale_running(&self) -> Duration {
        Duration::from_secs(self.stale_running_secs)
    }
}

fn default_checkpoints_enabled() -> bool {
    true
}

fn default_stale_running_secs() -> u64 {
    900 // 15 minutes
}

fn default_max_questions() -> usize {
    5
}

fn default_agent() -> String {
    "pm".to_string()
}

/// Resource cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Entries idle longer than this are reclaimed by sweep
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Interval of the background sweeper task
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: default_max_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_max_idle_secs() -> u64 {
    86_400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

/// AI request throttling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum interval between completed calls for one tenant
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Time-to-live of the per-tenant lease key
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Bounded retries while waiting for a contended lease
    #[serde(default = "default_max_lease_attempts")]
    pub max_lease_attempts: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
            max_lease_attempts: default_max_lease_attempts(),
        }
    }
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_lease_ttl_secs() -> u64 {
    30
}

fn default_max_lease_attempts() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults() {
        let config = AppConfig::load_from_env("MAESTRO_TEST_UNSET").unwrap();

        assert_eq!(config.redis.url, "redis://localhost");
        assert_eq!(config.throttle.min_interval_ms, 2000);
        assert_eq!(config.throttle.lease_ttl_secs, 30);
        assert_eq!(config.cache.max_idle_secs, 86_400);
        assert!(config.engine.checkpoints_enabled);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_questions, 5);
        assert_eq!(config.stale_running(), Duration::from_secs(900));
    }

    #[test]
    fn test_throttle_durations() {
        let config = ThrottleConfig::default();
        assert_eq!(config.min_interval(), Duration::from_millis(2000));
        assert_eq!(config.lease_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_redis_config_builder() {
        let config = RedisConfig::new("redis://cache:6379".to_string())
            .with_key_prefix("test:".to_string());

        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.key_prefix, "test:");
    }
}
