use serde::Serialize;

use crate::executor::types::{Batch, TaskOutcome, TaskStatus};

/// Structured events emitted by the engine.
///
/// Delivery is fire-and-forget: sinks must not block and the engine never
/// waits on them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: String,
        total_tasks: usize,
        total_batches: usize,
    },
    Plan {
        run_id: String,
        batches: Vec<Batch>,
    },
    BatchStarted {
        run_id: String,
        batch_index: usize,
        task_ids: Vec<String>,
    },
    TaskStarted {
        run_id: String,
        task_id: String,
        batch_index: usize,
        attempt: u32,
    },
    TaskCompleted {
        run_id: String,
        outcome: TaskOutcome,
    },
    BatchCompleted {
        run_id: String,
        batch_index: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
    },
    NodeCompleted {
        run_id: String,
        node_id: String,
        success: bool,
        duration_ms: u64,
    },
    CheckpointSaved {
        run_id: String,
        checkpoint_id: String,
        completed: usize,
        failed: usize,
        batch_index: usize,
    },
    RunCompleted {
        run_id: String,
        success: bool,
        cancelled: bool,
        duration_ms: u64,
    },
}

impl ExecutionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::Plan { .. } => "run.plan",
            Self::BatchStarted { .. } => "batch.started",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::BatchCompleted { .. } => "batch.completed",
            Self::NodeStarted { .. } => "node.started",
            Self::NodeCompleted { .. } => "node.completed",
            Self::CheckpointSaved { .. } => "checkpoint.saved",
            Self::RunCompleted { .. } => "run.completed",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::Plan { run_id, .. }
            | Self::BatchStarted { run_id, .. }
            | Self::TaskStarted { run_id, .. }
            | Self::TaskCompleted { run_id, .. }
            | Self::BatchCompleted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::CheckpointSaved { run_id, .. }
            | Self::RunCompleted { run_id, .. } => run_id,
        }
    }

    pub(crate) fn batch_completed(run_id: &str, batch_index: usize, outcomes: &[&TaskOutcome]) -> Self {
        let count = |status: TaskStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self::BatchCompleted {
            run_id: run_id.to_string(),
            batch_index,
            succeeded: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed),
            skipped: count(TaskStatus::Skipped),
        }
    }
}

/// Subscriber for engine events (logging, metrics, event bus, renderers).
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;
    fn emit(&self, event: &ExecutionEvent);
}
