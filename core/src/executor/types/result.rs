use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowState;

/// One resolution step: task ids whose dependencies all live in earlier batches.
pub type Batch = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Never submitted because the run was cancelled first.
    NotRun,
}

/// Why a task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    Failed { message: String },
    Timeout { after_ms: u64 },
    BlockedByFailedDependency { dependency: String },
    Cancelled,
    /// A graph loop node was entered more than `max_iterations` times.
    LoopLimitExceeded { max_iterations: u32 },
}

impl TaskError {
    /// Raw failures count against `success`; derived errors do not.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed { .. } | Self::Timeout { .. } | Self::LoopLimitExceeded { .. }
        )
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { message } => write!(f, "task failed: {message}"),
            Self::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            Self::BlockedByFailedDependency { dependency } => {
                write!(f, "blocked by failed dependency '{dependency}'")
            }
            Self::Cancelled => write!(f, "cancelled before start"),
            Self::LoopLimitExceeded { max_iterations } => {
                write!(f, "loop exceeded {max_iterations} iterations")
            }
        }
    }
}

/// Result of executing a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub batch_index: usize,

    /// Executor result for successful tasks; also kept for unsuccessful calls
    /// that returned one.
    pub result: Option<serde_json::Value>,

    pub error: Option<TaskError>,

    /// Execution duration in milliseconds (all attempts)
    pub duration_ms: u64,

    /// Number of executor calls made
    pub attempts: u32,
}

impl TaskOutcome {
    pub fn skipped(task_id: &str, batch_index: usize, dependency: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Skipped,
            batch_index,
            result: None,
            error: Some(TaskError::BlockedByFailedDependency {
                dependency: dependency.to_string(),
            }),
            duration_ms: 0,
            attempts: 0,
        }
    }

    pub fn not_run(task_id: &str, batch_index: usize) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::NotRun,
            batch_index,
            result: None,
            error: Some(TaskError::Cancelled),
            duration_ms: 0,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Result of executing a task graph
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: String,

    /// True iff no task failed or timed out.
    pub success: bool,

    pub cancelled: bool,

    /// Execution batches (for debugging)
    pub batches: Vec<Batch>,

    /// Individual task results (task_id -> TaskOutcome)
    pub outcomes: HashMap<String, TaskOutcome>,

    /// State after the last merge; successful results are stored under the task id.
    pub state: WorkflowState,

    /// Total execution duration in milliseconds
    pub duration_ms: u64,

    /// Id of the most recent checkpoint written during the run.
    pub last_checkpoint: Option<String>,
}

impl ExecutionResult {
    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.outcomes.get(task_id).map(|o| o.status)
    }

    pub fn total_tasks(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }

    pub fn not_run(&self) -> usize {
        self.count(TaskStatus::NotRun)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.outcomes.values().filter(|o| o.status == status).count()
    }
}
