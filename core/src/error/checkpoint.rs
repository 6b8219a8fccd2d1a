use thiserror::Error;

use super::code::ErrorCode;
use super::executor::ExecutorError;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("checkpoint '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("checkpoint '{0}' already exists")]
    AlreadyExists(String),

    #[error("checkpoint store error: {0}")]
    Store(String),

    #[error("cannot plan resume: {0}")]
    Resolve(#[from] ExecutorError),
}

impl CheckpointError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::CheckpointNotFound,
            Self::Corrupt { .. } => ErrorCode::CheckpointCorrupt,
            Self::AlreadyExists(_) | Self::Store(_) => ErrorCode::CheckpointStore,
            Self::Resolve(e) => e.error_code(),
        }
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}
