pub mod checkpoints;
pub mod cli;
pub mod run;

use weft_core::api::{CheckpointError, CliError, ExecutionResult, InputError};

/// Process exit code for a finished run.
///
/// 0: everything succeeded; 1: some task failed or timed out; 2: cancelled.
pub fn exit_code_for_result(result: &ExecutionResult) -> i32 {
    if result.cancelled {
        2
    } else if result.success {
        0
    } else {
        1
    }
}

/// Process exit code for an error that stopped the command.
///
/// 11: config; 12: structural (tasks, dependencies, routes, graphs);
/// 13: checkpoint; 20: io or usage; 50: internal.
pub fn exit_code_for_error(e: &CliError) -> i32 {
    match e {
        CliError::Config(_) => 11,
        CliError::Input(InputError::Io(_)) => 20,
        CliError::Executor(_) | CliError::Input(_) => 12,
        CliError::Checkpoint(CheckpointError::Resolve(_)) => 12,
        CliError::Checkpoint(_) => 13,
        CliError::Io(_) | CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}
