use thiserror::Error;

use super::code::ErrorCode;

/// Structural errors raised while resolving, validating or driving a run.
///
/// Per-task failures are not represented here; they are carried as values in
/// [`crate::executor::types::TaskOutcome`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(String),

    #[error("Unknown dependency: task '{task_id}' depends on '{missing_dep}'")]
    UnknownDependency {
        task_id: String,
        missing_dep: String,
    },

    #[error("Cyclic dependency involving '{member}': {path}")]
    CyclicDependency { member: String, path: String },

    #[error("No executor registered for route '{route}' (task '{task_id}')")]
    UnknownRoute { task_id: String, route: String },

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Runner error: {0}")]
    Runner(String),
}

impl ExecutorError {
    /// Map executor error to protocol error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DuplicateTaskId(_) => ErrorCode::ValidationError,
            Self::UnknownDependency { .. } => ErrorCode::DependencyError,
            Self::CyclicDependency { .. } => ErrorCode::CircularDependency,
            Self::UnknownRoute { .. } => ErrorCode::RouteNotFound,
            Self::InvalidGraph(_) => ErrorCode::InvalidGraph,
            Self::Runner(_) => ErrorCode::GeneralError,
        }
    }
}
