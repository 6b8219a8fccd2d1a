use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{CheckpointManager, ResumeOptions, ResumePlan};
use crate::context::AppContext;
use crate::error::{CheckpointError, ExecutorError};
use crate::events_out::EventsOutSink;
use crate::workflow::{GraphRunResult, GraphRunner, GraphRuntime, WorkflowGraph, WorkflowState};

use super::graph::resolve;
use super::progress::ProgressMonitor;
use super::scheduler::{execute_batch_parallel, ConcurrencyLimiter};
use super::traits::{EventSink, ExecutionEvent, ExecutionRequest, Executor, ExecutorOutput, RetryStrategyPlugin};
use super::types::{
    Batch, CheckpointCadence, ExecutionOpts, ExecutionResult, Task, TaskError, TaskOutcome,
    TaskStatus,
};

/// Work the engine is about to drive: a fresh plan or a resumed one.
struct RunPlan {
    run_id: String,
    batches: Vec<Batch>,
    state: WorkflowState,
    completed: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl From<ResumePlan> for RunPlan {
    fn from(plan: ResumePlan) -> Self {
        Self {
            run_id: plan.run_id,
            batches: plan.batches,
            state: plan.state,
            completed: plan.completed,
            failed: plan.failed,
        }
    }
}

/// A task with its executor, looked up once before the run starts.
#[derive(Clone)]
struct Resolved<'t> {
    task: &'t Task,
    executor: Arc<dyn Executor>,
}

/// Drives task batches and workflow graphs.
///
/// One engine owns one [`ConcurrencyLimiter`]; batch runs and graph runs
/// started from it share the same bound. Cancelling the token stops new
/// submissions, lets in-flight calls finish and returns a partial result.
pub struct ExecutionEngine<'a> {
    ctx: &'a AppContext,
    opts: &'a ExecutionOpts,
    limiter: ConcurrencyLimiter,
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
    retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    checkpoints: Option<CheckpointManager>,
    cancel: CancellationToken,
}

pub struct ExecutionEngineBuilder<'a> {
    ctx: &'a AppContext,
    opts: &'a ExecutionOpts,
    limiter: Option<ConcurrencyLimiter>,
    sinks: Vec<Arc<dyn EventSink>>,
    retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    checkpoints: Option<CheckpointManager>,
    cancel: Option<CancellationToken>,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(ctx: &'a AppContext, opts: &'a ExecutionOpts) -> Self {
        ExecutionEngineBuilder::new(ctx, opts).build()
    }

    pub fn builder(ctx: &'a AppContext, opts: &'a ExecutionOpts) -> ExecutionEngineBuilder<'a> {
        ExecutionEngineBuilder::new(ctx, opts)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn checkpoints(&self) -> Option<&CheckpointManager> {
        self.checkpoints.as_ref()
    }

    /// Resolve batches and check that every task has an executor, without
    /// running anything.
    pub fn plan(&self, tasks: &[Task]) -> Result<Vec<Batch>, ExecutorError> {
        let batches = resolve(tasks)?;
        let lookup = index_tasks(tasks);
        self.resolve_routes(&batches, &lookup)?;
        Ok(batches)
    }

    /// Resolve and run a task list from scratch.
    ///
    /// Structural problems (duplicate ids, unknown dependencies, cycles,
    /// missing routes) fail before any task runs. Task failures do not; they
    /// are reported per task in the result.
    pub async fn run_tasks(&self, tasks: &[Task]) -> Result<ExecutionResult, ExecutorError> {
        let batches = resolve(tasks)?;
        let plan = RunPlan {
            run_id: Uuid::new_v4().to_string(),
            batches,
            state: WorkflowState::new(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
        };
        self.execute_plan(tasks, plan).await
    }

    /// Continue the run recorded in `checkpoint_id` with the same task list.
    pub async fn resume(
        &self,
        checkpoint_id: &str,
        tasks: &[Task],
        options: ResumeOptions,
    ) -> Result<ExecutionResult, CheckpointError> {
        let manager = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| CheckpointError::Store("no checkpoint store configured".to_string()))?;
        let plan = manager.resume(checkpoint_id, tasks, options).await?;
        tracing::info!(
            checkpoint_id = %checkpoint_id,
            run_id = %plan.run_id,
            completed = plan.completed.len(),
            carried_failures = plan.failed.len(),
            remaining_batches = plan.batches.len(),
            "resuming from checkpoint"
        );
        Ok(self.execute_plan(tasks, plan.into()).await?)
    }

    /// Walk a workflow graph under this engine's limiter, sinks and token.
    pub async fn run_graph(
        &self,
        graph: &WorkflowGraph,
        initial: WorkflowState,
    ) -> Result<GraphRunResult, ExecutorError> {
        let runtime = GraphRuntime {
            run_id: Uuid::new_v4().to_string(),
            limiter: self.limiter.clone(),
            sinks: self.sinks.clone(),
            cancel: self.cancel.clone(),
            default_timeout: self.opts.default_timeout,
        };
        let mut result = GraphRunner::new(graph, &runtime).run(initial).await?;

        if (result.cancelled || !result.success)
            && self.opts.checkpoint_cadence != CheckpointCadence::Never
        {
            let completed = result
                .nodes
                .iter()
                .filter(|n| n.success)
                .map(|n| n.node_id.clone())
                .collect();
            let failed = result
                .nodes
                .iter()
                .filter(|n| !n.success)
                .map(|n| n.node_id.clone())
                .collect();
            result.last_checkpoint = self
                .checkpoint(&result.run_id, &result.state, &completed, &failed, 0)
                .await;
        }

        Ok(result)
    }

    async fn execute_plan(&self, tasks: &[Task], plan: RunPlan) -> Result<ExecutionResult, ExecutorError> {
        let started = Instant::now();
        let lookup = index_tasks(tasks);
        let resolved = self.resolve_routes(&plan.batches, &lookup)?;

        let RunPlan {
            run_id,
            batches,
            mut state,
            mut completed,
            mut failed,
        } = plan;
        let total_tasks: usize = batches.iter().map(Vec::len).sum();

        tracing::info!(run_id = %run_id, tasks = total_tasks, batches = batches.len(), "run started");
        self.emit(ExecutionEvent::RunStarted {
            run_id: run_id.clone(),
            total_tasks,
            total_batches: batches.len(),
        });
        self.emit(ExecutionEvent::Plan {
            run_id: run_id.clone(),
            batches: batches.clone(),
        });

        let progress = ProgressMonitor::new(total_tasks, self.opts.progress_bar);
        let carried_failures = !failed.is_empty();
        let mut blocked: HashSet<String> = failed.iter().cloned().collect();
        let mut outcomes: HashMap<String, TaskOutcome> = HashMap::with_capacity(total_tasks);
        let mut cancelled = false;
        let mut last_checkpoint: Option<String> = None;
        let mut dirty = false;
        let mut since_checkpoint = 0usize;
        let mut next_batch = 0usize;

        for (batch_index, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.emit(ExecutionEvent::BatchStarted {
                run_id: run_id.clone(),
                batch_index,
                task_ids: batch.clone(),
            });
            progress.update_batch(batch_index, batches.len());

            let mut batch_outcomes: Vec<TaskOutcome> = Vec::with_capacity(batch.len());
            let mut runnable: Vec<String> = Vec::with_capacity(batch.len());
            for id in batch {
                let blocker = resolved.get(id.as_str()).and_then(|job| {
                    if !self.opts.block_dependents_on_failure {
                        return None;
                    }
                    job.task.depends_on.iter().find(|d| blocked.contains(d.as_str()))
                });
                match blocker {
                    Some(dep) => {
                        tracing::debug!(task_id = %id, dependency = %dep, "skipping task blocked by failed dependency");
                        let outcome = TaskOutcome::skipped(id, batch_index, dep);
                        blocked.insert(id.clone());
                        self.emit(ExecutionEvent::TaskCompleted {
                            run_id: run_id.clone(),
                            outcome: outcome.clone(),
                        });
                        progress.finish_task(&outcome);
                        batch_outcomes.push(outcome);
                    }
                    None => runnable.push(id.clone()),
                }
            }

            let ran = {
                let state = &state;
                let resolved = &resolved;
                let progress = &progress;
                let run_id = run_id.as_str();
                execute_batch_parallel(&runnable, |id| {
                    let job = resolved.get(id).cloned();
                    self.run_task(run_id, batch_index, id.to_string(), job, state, progress)
                })
                .await
            };

            // Merge in submission order; this loop is the only writer.
            for outcome in ran {
                match outcome.status {
                    TaskStatus::Succeeded => {
                        state.set(
                            outcome.task_id.clone(),
                            outcome.result.clone().unwrap_or(Value::Null),
                        );
                        state.record_visit(&outcome.task_id);
                        completed.insert(outcome.task_id.clone());
                        failed.remove(&outcome.task_id);
                        since_checkpoint += 1;
                        dirty = true;
                    }
                    TaskStatus::Failed => {
                        state.record_visit(&outcome.task_id);
                        failed.insert(outcome.task_id.clone());
                        blocked.insert(outcome.task_id.clone());
                        dirty = true;
                    }
                    TaskStatus::NotRun => cancelled = true,
                    TaskStatus::Skipped => {}
                }
                batch_outcomes.push(outcome);
            }

            let refs: Vec<&TaskOutcome> = batch_outcomes.iter().collect();
            let summary = ExecutionEvent::batch_completed(&run_id, batch_index, &refs);
            if let ExecutionEvent::BatchCompleted {
                succeeded,
                failed,
                skipped,
                ..
            } = &summary
            {
                tracing::info!(
                    run_id = %run_id,
                    batch_index,
                    succeeded,
                    failed,
                    skipped,
                    "batch completed"
                );
            }
            self.emit(summary);
            for outcome in batch_outcomes {
                outcomes.insert(outcome.task_id.clone(), outcome);
            }

            if cancelled {
                break;
            }
            next_batch = batch_index + 1;

            let due = match self.opts.checkpoint_cadence {
                CheckpointCadence::Never => false,
                CheckpointCadence::Batch => true,
                CheckpointCadence::Tasks { every } => every > 0 && since_checkpoint >= every,
            };
            if due {
                if let Some(id) = self
                    .checkpoint(&run_id, &state, &completed, &failed, next_batch)
                    .await
                {
                    last_checkpoint = Some(id);
                    since_checkpoint = 0;
                    dirty = false;
                }
            }
        }

        if cancelled {
            tracing::warn!(run_id = %run_id, next_batch, "run cancelled; remaining tasks not submitted");
            for (batch_index, batch) in batches.iter().enumerate().skip(next_batch) {
                for id in batch {
                    if outcomes.contains_key(id) {
                        continue;
                    }
                    let outcome = TaskOutcome::not_run(id, batch_index);
                    self.emit(ExecutionEvent::TaskCompleted {
                        run_id: run_id.clone(),
                        outcome: outcome.clone(),
                    });
                    outcomes.insert(id.clone(), outcome);
                }
            }
        }

        let any_failure = outcomes
            .values()
            .any(|o| o.error.as_ref().is_some_and(TaskError::is_failure));
        let success = !any_failure && !carried_failures;

        let terminal = cancelled || !success;
        if terminal
            && self.opts.checkpoint_cadence != CheckpointCadence::Never
            && (dirty || last_checkpoint.is_none())
        {
            if let Some(id) = self
                .checkpoint(&run_id, &state, &completed, &failed, next_batch)
                .await
            {
                last_checkpoint = Some(id);
            }
        }

        state.touch();
        progress.finish(success, cancelled);
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            success,
            cancelled,
            duration_ms,
            "run finished"
        );
        self.emit(ExecutionEvent::RunCompleted {
            run_id: run_id.clone(),
            success,
            cancelled,
            duration_ms,
        });

        Ok(ExecutionResult {
            run_id,
            success,
            cancelled,
            batches,
            outcomes,
            state,
            duration_ms,
            last_checkpoint,
        })
    }

    fn resolve_routes<'t>(
        &self,
        batches: &[Batch],
        lookup: &HashMap<&str, &'t Task>,
    ) -> Result<HashMap<String, Resolved<'t>>, ExecutorError> {
        let mut resolved = HashMap::new();
        for id in batches.iter().flatten() {
            let task = lookup
                .get(id.as_str())
                .copied()
                .ok_or_else(|| ExecutorError::Runner(format!("task '{id}' is missing from the input")))?;
            let executor = self
                .ctx
                .registry()
                .resolve(&task.task_type)
                .ok_or_else(|| ExecutorError::UnknownRoute {
                    task_id: task.id.clone(),
                    route: task.task_type.clone(),
                })?;
            resolved.insert(id.clone(), Resolved { task, executor });
        }
        Ok(resolved)
    }

    async fn run_task(
        &self,
        run_id: &str,
        batch_index: usize,
        task_id: String,
        job: Option<Resolved<'_>>,
        state: &WorkflowState,
        progress: &ProgressMonitor,
    ) -> TaskOutcome {
        let outcome = match job {
            Some(job) => self.attempt_task(run_id, batch_index, job, state, progress).await,
            None => TaskOutcome {
                task_id: task_id.clone(),
                status: TaskStatus::Failed,
                batch_index,
                result: None,
                error: Some(TaskError::Failed {
                    message: "task has no resolved executor".to_string(),
                }),
                duration_ms: 0,
                attempts: 0,
            },
        };

        match outcome.status {
            TaskStatus::Failed => tracing::warn!(
                task_id = %outcome.task_id,
                attempts = outcome.attempts,
                error = %outcome.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                "task failed"
            ),
            _ => tracing::debug!(
                task_id = %outcome.task_id,
                status = ?outcome.status,
                duration_ms = outcome.duration_ms,
                "task finished"
            ),
        }
        self.emit(ExecutionEvent::TaskCompleted {
            run_id: run_id.to_string(),
            outcome: outcome.clone(),
        });
        progress.finish_task(&outcome);
        outcome
    }

    /// Call the executor until it succeeds or the retry budget runs out.
    ///
    /// The concurrency permit is held for each call only, never across a
    /// retry delay.
    async fn attempt_task(
        &self,
        run_id: &str,
        batch_index: usize,
        job: Resolved<'_>,
        state: &WorkflowState,
        progress: &ProgressMonitor,
    ) -> TaskOutcome {
        let task = job.task;
        let max_attempts = task
            .retry
            .map(|r| r.saturating_add(1))
            .or_else(|| self.retry_strategy.as_ref().map(|s| s.max_attempts()))
            .unwrap_or(1)
            .max(1);
        let timeout = task
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.opts.default_timeout);
        let dependency_results: BTreeMap<String, Value> = task
            .depends_on
            .iter()
            .filter_map(|dep| state.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect();

        let started = Instant::now();
        let mut calls: u32 = 0;
        let mut last_error: Option<TaskError> = None;
        let mut last_result: Option<Value> = None;

        let error = loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = self.limiter.acquire() => Some(permit),
            };
            let _permit = match permit {
                Some(Ok(permit)) => permit,
                Some(Err(e)) => break TaskError::Failed { message: e.to_string() },
                None if calls == 0 => return TaskOutcome::not_run(&task.id, batch_index),
                None => break last_error.take().unwrap_or(TaskError::Cancelled),
            };

            calls += 1;
            if calls == 1 {
                progress.start_task(&task.id);
            }
            self.emit(ExecutionEvent::TaskStarted {
                run_id: run_id.to_string(),
                task_id: task.id.clone(),
                batch_index,
                attempt: calls,
            });

            let request = ExecutionRequest {
                id: task.id.clone(),
                run_id: run_id.to_string(),
                route: task.task_type.clone(),
                prompt: task.prompt.clone(),
                attempt: calls,
                dependency_results: dependency_results.clone(),
                metadata: task.metadata.clone(),
            };
            let call = job.executor.execute(request, timeout);
            let settled = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(res) => settle(res),
                    Err(_) => Err((
                        TaskError::Timeout {
                            after_ms: limit.as_millis() as u64,
                        },
                        None,
                    )),
                },
                None => settle(call.await),
            };
            drop(_permit);

            let error = match settled {
                Ok(result) => {
                    return TaskOutcome {
                        task_id: task.id.clone(),
                        status: TaskStatus::Succeeded,
                        batch_index,
                        result: Some(result),
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        attempts: calls,
                    };
                }
                Err((error, partial)) => {
                    if partial.is_some() {
                        last_result = partial;
                    }
                    error
                }
            };

            let error_text = error.to_string();
            if calls >= max_attempts {
                break error;
            }
            if let Some(strategy) = &self.retry_strategy {
                if strategy.is_fatal_error(&error_text) {
                    tracing::debug!(task_id = %task.id, error = %error_text, "fatal error, not retrying");
                    break error;
                }
            }
            let delay = self
                .retry_strategy
                .as_ref()
                .and_then(|s| s.next_delay(calls, &error_text))
                .unwrap_or_default();
            tracing::warn!(
                task_id = %task.id,
                attempt = calls,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error_text,
                "attempt failed, retrying"
            );
            last_error = Some(error);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break last_error.take().unwrap_or(TaskError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        TaskOutcome {
            task_id: task.id.clone(),
            status: TaskStatus::Failed,
            batch_index,
            result: last_result,
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
            attempts: calls,
        }
    }

    async fn checkpoint(
        &self,
        run_id: &str,
        state: &WorkflowState,
        completed: &BTreeSet<String>,
        failed: &BTreeSet<String>,
        batch_index: usize,
    ) -> Option<String> {
        let manager = self.checkpoints.as_ref()?;
        match manager
            .snapshot(run_id, state, completed, failed, batch_index)
            .await
        {
            Ok(checkpoint) => {
                tracing::info!(
                    run_id = %run_id,
                    checkpoint_id = %checkpoint.checkpoint_id,
                    store = manager.store_name(),
                    batch_index,
                    "checkpoint saved"
                );
                self.emit(ExecutionEvent::CheckpointSaved {
                    run_id: run_id.to_string(),
                    checkpoint_id: checkpoint.checkpoint_id.clone(),
                    completed: completed.len(),
                    failed: failed.len(),
                    batch_index,
                });
                Some(checkpoint.checkpoint_id)
            }
            Err(e) => {
                tracing::warn!(
                    run_id = %run_id,
                    store = manager.store_name(),
                    error = %e,
                    "failed to write checkpoint"
                );
                None
            }
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        tracing::trace!(event = event.event_type(), run_id = event.run_id(), "engine event");
        for sink in self.sinks.iter() {
            sink.emit(&event);
        }
    }
}

impl<'a> ExecutionEngineBuilder<'a> {
    pub fn new(ctx: &'a AppContext, opts: &'a ExecutionOpts) -> Self {
        Self {
            ctx,
            opts,
            limiter: None,
            sinks: Vec::new(),
            retry_strategy: None,
            checkpoints: None,
            cancel: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(mut self, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategyPlugin>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Share a limiter with other engines so the bound is process-wide.
    pub fn limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> ExecutionEngine<'a> {
        let mut sinks = self.sinks;
        if let Some(tx) = self.ctx.events_out() {
            sinks.push(Arc::new(EventsOutSink::new(tx)));
        }
        let checkpoints = self
            .checkpoints
            .or_else(|| self.ctx.checkpoint_store().map(CheckpointManager::new));

        ExecutionEngine {
            ctx: self.ctx,
            opts: self.opts,
            limiter: self
                .limiter
                .unwrap_or_else(|| ConcurrencyLimiter::new(self.opts.max_parallel)),
            sinks: Arc::new(sinks),
            retry_strategy: self.retry_strategy,
            checkpoints,
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

/// Run a task list with a default engine for `ctx`.
pub async fn execute_tasks(
    ctx: &AppContext,
    opts: &ExecutionOpts,
    tasks: &[Task],
) -> Result<ExecutionResult, ExecutorError> {
    ExecutionEngine::new(ctx, opts).run_tasks(tasks).await
}

fn index_tasks(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|t| (t.id.as_str(), t)).collect()
}

fn settle(res: anyhow::Result<ExecutorOutput>) -> Result<Value, (TaskError, Option<Value>)> {
    match res {
        Ok(out) if out.success => Ok(out.result),
        Ok(out) => {
            let partial = Some(out.result).filter(|v| !v.is_null());
            let message = out
                .error
                .unwrap_or_else(|| "executor reported failure".to_string());
            Err((TaskError::Failed { message }, partial))
        }
        Err(e) => Err((
            TaskError::Failed {
                message: format!("{e:#}"),
            },
            None,
        )),
    }
}
