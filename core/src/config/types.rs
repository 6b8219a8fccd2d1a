use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::executor::types::{CheckpointCadence, RetryConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,

    /// Routing key -> executor definition.
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,

    /// Route used for task types with no entry in `routes`.
    #[serde(default)]
    pub default_route: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "weft_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    #[serde(default = "default_block_dependents")]
    pub block_dependents_on_failure: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub progress_bar: bool,
}

fn default_max_parallel() -> usize {
    num_cpus::get().max(1)
}

fn default_block_dependents() -> bool {
    true
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_timeout_secs: None,
            block_dependents_on_failure: default_block_dependents(),
            retry: RetryConfig::default(),
            progress_bar: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,

    /// Directory holding `checkpoint_<id>.json` files. `~` is expanded.
    #[serde(default = "default_checkpoint_directory")]
    pub directory: String,

    #[serde(default)]
    pub cadence: CheckpointCadence,
}

fn default_checkpoint_enabled() -> bool {
    true
}

fn default_checkpoint_directory() -> String {
    "~/.weft/checkpoints".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            directory: default_checkpoint_directory(),
            cadence: CheckpointCadence::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    pub enabled: bool,
    pub path: String,
    pub channel_capacity: usize,
    pub drop_when_full: bool,
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./run.events.jsonl".to_string(),
            channel_capacity: 2048,
            drop_when_full: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// Spawn a subprocess per call.
    Command,
    /// Return the prompt as the result.
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub kind: RouteKind,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Per-route default timeout; task timeouts take precedence.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}
