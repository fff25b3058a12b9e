mod env;

use serde::Deserialize;

/// Complete runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    #[serde(default)]
    pub entities: EntityConfig,
}

/// Task worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Async worker threads of the executor's runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound on threads running task bodies concurrently
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_blocking_threads() -> usize {
    64
}

fn default_thread_name() -> String {
    "entity-task".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_blocking_threads: default_max_blocking_threads(),
            thread_name: default_thread_name(),
        }
    }
}

/// Subscription bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Capacity of the async event firehose (slow consumers lag, publishers never block)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

/// Entity identity configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    /// Length of generated entity ids
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

fn default_id_length() -> usize {
    10
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            id_length: default_id_length(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            subscriptions: SubscriptionConfig::default(),
            entities: EntityConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `ENTITY_RUNTIME_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        env::apply_overrides(&mut cfg, |name| std::env::var(name).ok());
        cfg
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<RuntimeConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: RuntimeConfig = toml::from_str(&contents)?;
    Ok(config)
}
