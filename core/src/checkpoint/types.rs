use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::workflow::WorkflowState;

/// Current on-disk format. Readers reject anything else as corrupt.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable snapshot of a run: enough to rebuild the remaining plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub run_id: String,
    pub state: WorkflowState,
    pub completed_task_ids: BTreeSet<String>,
    pub failed_task_ids: BTreeSet<String>,
    /// Index of the first batch not fully processed when the snapshot was taken.
    pub current_batch_index: usize,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
}

impl Checkpoint {
    pub fn new(
        run_id: impl Into<String>,
        state: WorkflowState,
        completed_task_ids: BTreeSet<String>,
        failed_task_ids: BTreeSet<String>,
        current_batch_index: usize,
    ) -> Self {
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            state,
            completed_task_ids,
            failed_task_ids,
            current_batch_index,
            timestamp: Utc::now(),
            version: CHECKPOINT_VERSION,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CheckpointError::Store(format!("serialize checkpoint {}: {e}", self.checkpoint_id)))
    }

    /// Parse stored bytes; anything unreadable is `Corrupt`, never skipped.
    pub fn from_bytes(id: &str, bytes: &[u8]) -> Result<Self, CheckpointError> {
        let corrupt = |reason: String| CheckpointError::Corrupt {
            id: id.to_string(),
            reason,
        };

        let checkpoint: Checkpoint = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        if checkpoint.checkpoint_id != id {
            return Err(corrupt(format!(
                "stored id '{}' does not match requested id",
                checkpoint.checkpoint_id
            )));
        }
        Ok(checkpoint)
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> String {
        format!(
            "{}  run={}  batch={}  completed={}  failed={}  {}",
            self.checkpoint_id,
            self.run_id,
            self.current_batch_index,
            self.completed_task_ids.len(),
            self.failed_task_ids.len(),
            self.timestamp.to_rfc3339()
        )
    }
}
