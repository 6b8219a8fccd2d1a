//! Batch execution of dependency-ordered tasks.
//!
//! ```text
//! Vec<Task>
//!   ↓
//! TaskGraph::from_tasks()          duplicate ids, unknown dependencies
//!   ↓
//! TaskGraph::topological_sort()    cycles; Vec<Batch>, priority-ordered
//!   ↓
//! ExecutionEngine::run_tasks()     routes resolved, batches run under the
//!   ↓                              shared ConcurrencyLimiter
//! ExecutionResult                  per-task outcomes + merged WorkflowState
//! ```
//!
//! Graph-mode workflows live in [`crate::workflow`] and run through the same
//! engine via [`ExecutionEngine::run_graph`].

mod engine;
pub mod graph;
mod progress;
pub mod registry;
pub mod scheduler;
pub mod traits;
pub mod types;

pub use engine::{execute_tasks, ExecutionEngine, ExecutionEngineBuilder};
pub use graph::{resolve, resolve_remaining, TaskGraph};
pub use progress::ProgressMonitor;
pub use registry::ExecutorRegistry;
pub use scheduler::{execute_batch_parallel, ConcurrencyLimiter};
pub use types::{ExecutionOpts, ExecutionResult, Task, TaskOutcome, TaskStatus};
