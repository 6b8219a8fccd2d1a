use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What an executor receives for one task or graph node invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Task id (batch mode) or node id (graph mode).
    pub id: String,
    pub run_id: String,
    /// Routing key the executor was selected by.
    pub route: String,
    pub prompt: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Results of direct dependencies, read from the state at submission time.
    pub dependency_results: BTreeMap<String, serde_json::Value>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// What an executor hands back. `success == false` is a task failure, not an
/// engine error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub result: serde_json::Value,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutorOutput {
    pub fn ok(result: impl Into<serde_json::Value>) -> Self {
        Self {
            result: result.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: serde_json::Value::Null,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Backend that performs the actual work (API call, subprocess, ...).
///
/// Implementations must suspend rather than block while waiting on I/O. The
/// timeout is advisory: the engine enforces it independently and drops the
/// call future on expiry.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        request: ExecutionRequest,
        timeout: Option<Duration>,
    ) -> anyhow::Result<ExecutorOutput>;
}
