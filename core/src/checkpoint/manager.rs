use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::CheckpointError;
use crate::executor::graph::resolve_remaining;
use crate::executor::types::{Batch, TaskLike};
use crate::workflow::WorkflowState;

use super::store::CheckpointStore;
use super::types::Checkpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeOptions {
    /// Re-run tasks that had failed. When false they stay failed and their
    /// dependents are skipped again.
    pub retry_failed: bool,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self { retry_failed: true }
    }
}

/// Continuation plan rebuilt from a checkpoint.
#[derive(Debug, Clone)]
pub struct ResumePlan {
    pub checkpoint_id: String,
    pub run_id: String,
    pub batches: Vec<Batch>,
    pub state: WorkflowState,
    pub completed: BTreeSet<String>,
    /// Failures carried over without a retry.
    pub failed: BTreeSet<String>,
}

/// Saves, loads and plans resumption from checkpoints.
///
/// The manager holds no per-run state; the engine decides when to snapshot.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub async fn snapshot(
        &self,
        run_id: &str,
        state: &WorkflowState,
        completed: &BTreeSet<String>,
        failed: &BTreeSet<String>,
        current_batch_index: usize,
    ) -> Result<Checkpoint, CheckpointError> {
        let mut state = state.clone();
        state.touch();
        let checkpoint = Checkpoint::new(
            run_id,
            state,
            completed.clone(),
            failed.clone(),
            current_batch_index,
        );
        self.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.store
            .put(&checkpoint.checkpoint_id, checkpoint.to_bytes()?)
            .await
    }

    pub async fn load(&self, checkpoint_id: &str) -> Result<Checkpoint, CheckpointError> {
        let bytes = self
            .store
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        Checkpoint::from_bytes(checkpoint_id, &bytes)
    }

    /// Every stored checkpoint, oldest first. A corrupt entry fails the
    /// whole listing.
    pub async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut checkpoints = Vec::new();
        for id in self.store.list().await? {
            checkpoints.push(self.load(&id).await?);
        }
        checkpoints.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.checkpoint_id.cmp(&b.checkpoint_id))
        });
        Ok(checkpoints)
    }

    /// Most recent checkpoint, optionally restricted to one run.
    pub async fn latest(&self, run_id: Option<&str>) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|cp| run_id.map_or(true, |r| cp.run_id == r))
            .last())
    }

    pub async fn resume<T: TaskLike>(
        &self,
        checkpoint_id: &str,
        tasks: &[T],
        options: ResumeOptions,
    ) -> Result<ResumePlan, CheckpointError> {
        let checkpoint = self.load(checkpoint_id).await?;
        plan_resume(&checkpoint, tasks, options)
    }
}

/// Rebuild the remaining plan: the full task list minus what the checkpoint
/// already settled.
///
/// Completed ids unknown to `tasks` are dropped. Batches that would contain
/// only already-completed tasks do not appear.
pub fn plan_resume<T: TaskLike>(
    checkpoint: &Checkpoint,
    tasks: &[T],
    options: ResumeOptions,
) -> Result<ResumePlan, CheckpointError> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id()).collect();

    let completed: BTreeSet<String> = checkpoint
        .completed_task_ids
        .iter()
        .filter(|id| known.contains(id.as_str()))
        .cloned()
        .collect();

    let failed: BTreeSet<String> = if options.retry_failed {
        BTreeSet::new()
    } else {
        checkpoint
            .failed_task_ids
            .iter()
            .filter(|id| known.contains(id.as_str()) && !completed.contains(*id))
            .cloned()
            .collect()
    };

    let settled: HashSet<String> = completed.iter().chain(failed.iter()).cloned().collect();
    let batches = resolve_remaining(tasks, &settled)?
        .into_iter()
        .filter(|batch| !batch.iter().all(|id| settled.contains(id)))
        .collect();

    Ok(ResumePlan {
        checkpoint_id: checkpoint.checkpoint_id.clone(),
        run_id: checkpoint.run_id.clone(),
        batches,
        state: checkpoint.state.clone(),
        completed,
        failed,
    })
}
