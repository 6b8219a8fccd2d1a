//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `weft_core::api` instead of reaching into internal modules.

pub use crate::checkpoint::{
    plan_resume, Checkpoint, CheckpointManager, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, ResumeOptions, ResumePlan, CHECKPOINT_VERSION,
};
pub use crate::config::{
    expand_path, get_weft_data_dir, load_config, load_default, AppConfig, CheckpointConfig,
    EventsOutConfig, ExecutorConfig, LoggingConfig, RouteConfig, RouteKind,
};
pub use crate::context::AppContext;
pub use crate::error::{CheckpointError, CliError, ErrorCode, ExecutorError, InputError};
pub use crate::events_out::{event_line, EventsOutSink, EventsOutTx};
pub use crate::executor::traits::{
    EventSink, ExecutionEvent, ExecutionRequest, Executor, ExecutorOutput, RetryStrategyPlugin,
};
pub use crate::executor::types::{
    Batch, CheckpointCadence, ExecutionOpts, ExecutionResult, RetryConfig, Task, TaskError,
    TaskLike, TaskOutcome, TaskStatus,
};
pub use crate::executor::{
    execute_tasks, resolve, resolve_remaining, ConcurrencyLimiter, ExecutionEngine,
    ExecutionEngineBuilder, ExecutorRegistry, TaskGraph,
};
pub use crate::input::{load_tasks_from_file, parse_tasks, validate_id};
pub use crate::workflow::{
    handler_fn, EdgeKind, ExecutorHandler, GraphEdge, GraphNode, GraphRunResult, HandlerOutput,
    NodeContext, NodeHandler, NodeKind, NodeOutcome, Predicate, ValidationWarning, WorkflowGraph,
    WorkflowState,
};
