use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;
use crate::executor::scheduler::ConcurrencyLimiter;
use crate::executor::traits::{EventSink, ExecutionEvent};
use crate::executor::types::TaskError;

use super::handler::NodeContext;
use super::model::{GraphNode, NodeKind, WorkflowGraph};
use super::state::WorkflowState;

/// Outcome of one node entry. Loop nodes produce one per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub node_id: String,
    pub success: bool,
    pub error: Option<TaskError>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GraphRunResult {
    pub run_id: String,
    /// True iff no handler failed or timed out and no loop overran.
    pub success: bool,
    pub cancelled: bool,
    pub state: WorkflowState,
    /// Handler invocations in merge order.
    pub nodes: Vec<NodeOutcome>,
    pub duration_ms: u64,
    pub last_checkpoint: Option<String>,
}

impl GraphRunResult {
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !n.success)
            .map(|n| n.node_id.as_str())
            .collect()
    }
}

/// Engine resources a graph walk runs under.
#[derive(Clone)]
pub struct GraphRuntime {
    pub run_id: String,
    pub limiter: ConcurrencyLimiter,
    pub sinks: Arc<Vec<Arc<dyn EventSink>>>,
    pub cancel: CancellationToken,
    pub default_timeout: Option<Duration>,
}

impl GraphRuntime {
    fn emit(&self, event: ExecutionEvent) {
        for sink in self.sinks.iter() {
            sink.emit(&event);
        }
    }
}

/// Progress of one walk (the main path or a fork).
struct Branch {
    state: WorkflowState,
    nodes: Vec<NodeOutcome>,
    failed: bool,
    cancelled: bool,
}

impl Branch {
    fn new(state: WorkflowState) -> Self {
        Self {
            state,
            nodes: Vec::new(),
            failed: false,
            cancelled: false,
        }
    }

    fn stopped(&self) -> bool {
        self.failed || self.cancelled
    }

    fn absorb(&mut self, base: &WorkflowState, other: Branch) {
        self.state.merge_branch(base, &other.state);
        self.nodes.extend(other.nodes);
        self.failed |= other.failed;
        self.cancelled |= other.cancelled;
    }
}

enum Invocation {
    Done,
    Failed,
    Cancelled,
    Halted,
}

/// Walks a [`WorkflowGraph`] from its start node.
///
/// Each path carries its own state copy; forks (parallel splits, or several
/// taken edges) run concurrently and are merged back in submission order.
/// A failing handler ends its own path; other paths keep going. A loop that
/// overruns its bound halts the whole run: handlers already running finish,
/// nothing new starts.
pub struct GraphRunner<'a> {
    graph: &'a WorkflowGraph,
    runtime: &'a GraphRuntime,
    halted: AtomicBool,
}

impl<'a> GraphRunner<'a> {
    pub fn new(graph: &'a WorkflowGraph, runtime: &'a GraphRuntime) -> Self {
        Self {
            graph,
            runtime,
            halted: AtomicBool::new(false),
        }
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub async fn run(&self, initial: WorkflowState) -> Result<GraphRunResult, ExecutorError> {
        let started = Instant::now();

        for warning in self.graph.validate()? {
            tracing::warn!(graph = %self.graph.name(), "{}", warning);
        }
        let start = start_id(self.graph)?;

        self.runtime.emit(ExecutionEvent::RunStarted {
            run_id: self.runtime.run_id.clone(),
            total_tasks: self.graph.nodes().len(),
            total_batches: 0,
        });

        let branch = self.walk(self.graph, start, initial, None).await?;
        let mut state = branch.state;
        state.touch();

        let success = !branch.failed;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.runtime.emit(ExecutionEvent::RunCompleted {
            run_id: self.runtime.run_id.clone(),
            success,
            cancelled: branch.cancelled,
            duration_ms,
        });

        Ok(GraphRunResult {
            run_id: self.runtime.run_id.clone(),
            success,
            cancelled: branch.cancelled,
            state,
            nodes: branch.nodes,
            duration_ms,
            last_checkpoint: None,
        })
    }

    fn walk<'w>(
        &'w self,
        graph: &'w WorkflowGraph,
        from: String,
        state: WorkflowState,
        stop_at: Option<String>,
    ) -> BoxFuture<'w, Result<Branch, ExecutorError>> {
        async move {
            let mut branch = Branch::new(state);
            let mut current = from;

            loop {
                if stop_at.as_deref() == Some(current.as_str()) {
                    return Ok(branch);
                }
                if self.runtime.cancel.is_cancelled() {
                    branch.cancelled = true;
                    return Ok(branch);
                }
                if self.is_halted() {
                    return Ok(branch);
                }

                let node = graph
                    .get(&current)
                    .ok_or_else(|| ExecutorError::InvalidGraph(format!("unknown node '{current}'")))?;
                branch.state.record_visit(&node.id);
                tracing::debug!(
                    run_id = %self.runtime.run_id,
                    node_id = %node.id,
                    kind = node.kind.label(),
                    "entering node"
                );

                match &node.kind {
                    NodeKind::End => return Ok(branch),
                    NodeKind::Loop { max_iterations, .. } => {
                        let entered = branch.state.enter_loop(&node.id);
                        if entered > *max_iterations {
                            tracing::error!(
                                run_id = %self.runtime.run_id,
                                node_id = %node.id,
                                max_iterations = *max_iterations,
                                "loop limit exceeded, halting graph run"
                            );
                            self.halted.store(true, Ordering::SeqCst);
                            let error = TaskError::LoopLimitExceeded {
                                max_iterations: *max_iterations,
                            };
                            self.record(&mut branch, node, Some(error), 0);
                            branch.failed = true;
                            return Ok(branch);
                        }
                    }
                    _ => {}
                }

                match self.invoke(node, &mut branch).await {
                    Invocation::Done => {}
                    Invocation::Failed => {
                        branch.failed = true;
                        return Ok(branch);
                    }
                    Invocation::Cancelled => {
                        branch.cancelled = true;
                        return Ok(branch);
                    }
                    Invocation::Halted => return Ok(branch),
                }
                if self.is_halted() {
                    return Ok(branch);
                }

                match &node.kind {
                    NodeKind::ParallelSplit { branches, join } => {
                        let base = branch.state.clone();
                        let forks = branches
                            .iter()
                            .map(|b| self.walk(graph, b.clone(), base.clone(), Some(join.clone())));
                        for fork in join_all(forks).await {
                            branch.absorb(&base, fork?);
                        }
                        if branch.stopped() {
                            return Ok(branch);
                        }
                        current = join.clone();
                        continue;
                    }
                    NodeKind::Subgraph(inner) => {
                        let base = branch.state.clone();
                        let inner_start = start_id(inner)?;
                        let nested = self.walk(inner, inner_start, base.clone(), None).await?;
                        branch.absorb(&base, nested);
                        if branch.stopped() {
                            return Ok(branch);
                        }
                    }
                    _ => {}
                }

                let mut next = graph.next_nodes(node, &branch.state);
                match next.len() {
                    0 => return Ok(branch),
                    1 => current = next.remove(0),
                    _ => {
                        let base = branch.state.clone();
                        let forks = next
                            .into_iter()
                            .map(|n| self.walk(graph, n, base.clone(), stop_at.clone()));
                        for fork in join_all(forks).await {
                            branch.absorb(&base, fork?);
                        }
                        return Ok(branch);
                    }
                }
            }
        }
        .boxed()
    }

    /// Run the node's handler (if any) under a concurrency permit and apply
    /// its output to the branch state.
    async fn invoke(&self, node: &GraphNode, branch: &mut Branch) -> Invocation {
        let Some(handler) = node.handler.as_ref() else {
            return Invocation::Done;
        };

        let permit = tokio::select! {
            biased;
            _ = self.runtime.cancel.cancelled() => return Invocation::Cancelled,
            permit = self.runtime.limiter.acquire() => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                self.record(branch, node, Some(TaskError::Failed { message: e.to_string() }), 0);
                return Invocation::Failed;
            }
        };
        if self.is_halted() {
            return Invocation::Halted;
        }

        self.runtime.emit(ExecutionEvent::NodeStarted {
            run_id: self.runtime.run_id.clone(),
            node_id: node.id.clone(),
        });

        let timeout = node.timeout.or(self.runtime.default_timeout);
        let ctx = NodeContext {
            run_id: &self.runtime.run_id,
            node_id: &node.id,
            config: &node.config,
            timeout,
        };
        let started = Instant::now();
        let call = handler.handle(&ctx, &branch.state);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(|e| TaskError::Failed {
                    message: format!("{e:#}"),
                }),
                Err(_) => Err(TaskError::Timeout {
                    after_ms: limit.as_millis() as u64,
                }),
            },
            None => call.await.map_err(|e| TaskError::Failed {
                message: format!("{e:#}"),
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                branch.state.apply(output);
                self.record(branch, node, None, duration_ms);
                Invocation::Done
            }
            Err(error) => {
                tracing::warn!(node_id = %node.id, error = %error, "node handler failed");
                self.record(branch, node, Some(error), duration_ms);
                Invocation::Failed
            }
        }
    }

    fn record(&self, branch: &mut Branch, node: &GraphNode, error: Option<TaskError>, duration_ms: u64) {
        let success = error.is_none();
        branch.nodes.push(NodeOutcome {
            node_id: node.id.clone(),
            success,
            error,
            duration_ms,
        });
        self.runtime.emit(ExecutionEvent::NodeCompleted {
            run_id: self.runtime.run_id.clone(),
            node_id: node.id.clone(),
            success,
            duration_ms,
        });
    }
}

fn start_id(graph: &WorkflowGraph) -> Result<String, ExecutorError> {
    graph
        .start_node()
        .map(|n| n.id.clone())
        .ok_or_else(|| ExecutorError::InvalidGraph(format!("{}: no start node", graph.name())))
}
