//! Graph-mode workflows.
//!
//! A [`WorkflowGraph`] is a set of typed nodes joined by normal, conditional
//! and loop-back edges. The [`GraphRunner`] walks it from the start node,
//! threading a [`WorkflowState`] through node handlers:
//!
//! ```text
//! start ─► task ─► condition ─┬─(pred)─► parallel_split ─┬─► a ─┐
//!                             │                          └─► b ─┴─► join ─► end
//!                             └─(else)─► loop ◄─┐
//!                                          └─► body ─(loop_back)
//! ```

mod handler;
mod model;
mod runner;
mod state;

pub use handler::{handler_fn, render_template, ExecutorHandler, NodeContext, NodeHandler};
pub use model::{
    EdgeKind, GraphEdge, GraphNode, NodeKind, Predicate, ValidationWarning, WorkflowGraph,
};
pub use runner::{GraphRunResult, GraphRunner, GraphRuntime, NodeOutcome};
pub use state::{HandlerOutput, StateMetadata, StateUpdate, WorkflowState};
