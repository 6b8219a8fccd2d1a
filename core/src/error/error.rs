use thiserror::Error;

use super::checkpoint::CheckpointError;
use super::code::ErrorCode;
use super::executor::ExecutorError;
use super::input::InputError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("executor failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Executor(e) => e.error_code(),
            Self::Checkpoint(e) => e.error_code(),
            Self::Input(e) => e.error_code(),
            Self::Command(_) | Self::Anyhow(_) => ErrorCode::GeneralError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
        }
    }
}
