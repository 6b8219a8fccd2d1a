use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution options for one engine instance.
#[derive(Debug, Clone)]
pub struct ExecutionOpts {
    /// Maximum in-flight task/node invocations across the whole engine.
    pub max_parallel: usize,

    /// Timeout applied to calls whose task/node does not carry one.
    pub default_timeout: Option<Duration>,

    /// Skip tasks whose (transitive) dependencies failed.
    pub block_dependents_on_failure: bool,

    /// When to write checkpoints during a batch run.
    pub checkpoint_cadence: CheckpointCadence,

    /// Enable visual progress bar (disabled for jsonl output)
    pub progress_bar: bool,
}

impl Default for ExecutionOpts {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus::get().max(1),
            default_timeout: None,
            block_dependents_on_failure: true,
            checkpoint_cadence: CheckpointCadence::default(),
            progress_bar: false,
        }
    }
}

impl ExecutionOpts {
    pub fn from_config(cfg: &crate::config::AppConfig) -> Self {
        Self {
            max_parallel: cfg.executor.max_parallel.max(1),
            default_timeout: cfg.executor.default_timeout_secs.map(Duration::from_secs),
            block_dependents_on_failure: cfg.executor.block_dependents_on_failure,
            checkpoint_cadence: if cfg.checkpoint.enabled {
                cfg.checkpoint.cadence
            } else {
                CheckpointCadence::Never
            },
            progress_bar: cfg.executor.progress_bar,
        }
    }
}

/// Caller-chosen checkpoint cadence. Terminal checkpoints (failure or
/// cancellation) are written regardless, unless the cadence is `Never`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CheckpointCadence {
    Never,
    /// After every completed batch.
    Batch,
    /// After every `every` completed tasks.
    Tasks { every: usize },
}

impl Default for CheckpointCadence {
    fn default() -> Self {
        Self::Batch
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: 100,
            max_delay_ms: 5000,
            max_attempts: 1,
        }
    }
}

fn default_retry_strategy() -> String {
    "exponential-backoff".to_string()
}
