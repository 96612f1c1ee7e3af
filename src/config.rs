use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::PollSettings;
use crate::domain::request::MAX_TRIP_DAYS;
use crate::orchestrator::{OrchestratorSettings, TaskDefaults};
use crate::protocol::{TopicNames, DEFAULT_TOPIC_PREFIX};
use crate::publisher::RetryPolicy;

/// Environment variable that overrides `bus.redis_url`.
pub const REDIS_URL_ENV: &str = "PLANNER_REDIS_URL";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    pub bus: BusConfig,
    pub retry: RetryPolicy,
    pub orchestrator: OrchestratorConfig,
    pub stages: StagesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process log; every component must run in the same process.
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub redis_url: String,
    pub topic_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            redis_url: "redis://localhost:6379/0".to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds a workflow may stay active. Default: 120
    pub deadline_secs: u64,
    pub watcher_interval_secs: u64,
    /// Records fetched per bus read.
    pub read_batch: usize,
    /// How long one bus read blocks waiting for records.
    pub block_timeout_ms: u64,
    pub defaults: TaskDefaults,
    /// Optional JSONL file receiving every workflow transition.
    pub transition_log: Option<PathBuf>,
    /// Drop stale pipeline records when `serve` starts.
    pub clear_on_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 120,
            watcher_interval_secs: 5,
            read_batch: 10,
            block_timeout_ms: 5000,
            defaults: TaskDefaults::default(),
            transition_log: None,
            clear_on_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Tasks one stage worker runs at the same time.
    pub max_concurrency: usize,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlannerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(REDIS_URL_ENV) {
            if !url.trim().is_empty() {
                self.bus.redis_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bus.topic_prefix.is_empty() {
            anyhow::bail!("bus.topic_prefix must not be empty");
        }
        if self.bus.backend == BusBackend::Redis && self.bus.redis_url.trim().is_empty() {
            anyhow::bail!("bus.redis_url is required for the redis backend");
        }

        self.retry.validate().context("Invalid retry policy")?;

        let orchestrator = &self.orchestrator;
        if orchestrator.deadline_secs == 0 {
            anyhow::bail!("orchestrator.deadline_secs must be at least 1");
        }
        if orchestrator.watcher_interval_secs == 0 {
            anyhow::bail!("orchestrator.watcher_interval_secs must be at least 1");
        }
        if orchestrator.read_batch == 0 {
            anyhow::bail!("orchestrator.read_batch must be at least 1");
        }
        // A zero block would turn every listener into a busy loop.
        if orchestrator.block_timeout_ms == 0 {
            anyhow::bail!("orchestrator.block_timeout_ms must be at least 1");
        }
        if !(1..=MAX_TRIP_DAYS).contains(&orchestrator.defaults.duration_days) {
            anyhow::bail!(
                "orchestrator.defaults.duration_days must be between 1 and {}",
                MAX_TRIP_DAYS
            );
        }

        if self.stages.max_concurrency == 0 {
            anyhow::bail!("stages.max_concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn topics(&self) -> TopicNames {
        TopicNames::new(self.bus.topic_prefix.clone())
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            deadline: Duration::from_secs(self.orchestrator.deadline_secs),
            watcher_interval: Duration::from_secs(self.orchestrator.watcher_interval_secs),
            defaults: self.orchestrator.defaults.clone(),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            max_batch: self.orchestrator.read_batch,
            block: Duration::from_millis(self.orchestrator.block_timeout_ms),
            error_backoff: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
