//! Engine configuration types.
//!
//! `EngineConfig` represents the `reconcile.toml` file that controls
//! concurrency, timeouts, retry policy, the state backend, and the
//! environment handed to job runners.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration. All fields have defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nodes executing at once within a wave.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for a single provider or runner call.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub state: StateConfig,

    /// Environment variables passed to every job runner.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
            state: StateConfig::default(),
            env: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Retry policy for retryable provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Which state store backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    /// Single JSON document, replaced atomically on every write.
    #[default]
    File,
    /// SQLite database in WAL mode.
    Sqlite,
}

/// State store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Explicit path; defaults to a file under the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}
