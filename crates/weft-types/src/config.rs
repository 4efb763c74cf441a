//! Engine configuration types for weft.
//!
//! `EngineConfig` represents the `config.toml` file that controls executor
//! defaults, timer and scheduler polling, storage location and logging.

use serde::{Deserialize, Serialize};

use crate::workflow::{
    CheckpointGranularity, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_ITERATIONS, ExecutionConfig,
};

/// Top-level configuration for the weft engine.
///
/// Loaded from `<data_dir>/config.toml`. Every section and field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub timers: TimerSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl EngineConfig {
    /// Default per-run execution options derived from the `[executor]` section.
    pub fn execution_config(&self) -> ExecutionConfig {
        let mut config = ExecutionConfig::default()
            .with_max_concurrency(self.executor.max_concurrency.max(1))
            .with_max_iterations(self.executor.max_iterations);
        if self.executor.checkpoint {
            config = config.with_checkpoints(self.executor.checkpoint_granularity);
        }
        config
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Write checkpoints during runs.
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub checkpoint_granularity: CheckpointGranularity,
    /// Capacity of the bounded channel behind `stream()`.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_event_buffer() -> usize {
    256
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_iterations: default_max_iterations(),
            checkpoint: false,
            checkpoint_granularity: CheckpointGranularity::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// `[timers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSection {
    /// How often the timer manager polls for due timers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fired timers older than this are pruned.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retention_secs() -> u64 {
    86_400
}

impl Default for TimerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// How often cron jobs are checked for due occurrences.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Which checkpoint store backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    File,
    Memory,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Overrides the data directory (otherwise `WEFT_DATA_DIR` or `~/.weft`).
    #[serde(default)]
    pub data_dir: Option<String>,
    /// SQLite database file name, relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub checkpoint_backend: CheckpointBackend,
}

fn default_database_file() -> String {
    "weft.db".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: default_database_file(),
            checkpoint_backend: CheckpointBackend::default(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Export spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            otel: false,
        }
    }
}
