use thiserror::Error;

use super::code::ErrorCode;

/// Errors raised while reading a task list handed over by a task producer.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("no task blocks found")]
    NoTasks,

    #[error("metadata line is invalid: {0}")]
    InvalidMetadataLine(String),

    #[error("missing ---CONTENT--- marker")]
    MissingContentMarker,

    #[error("missing ---END--- marker")]
    MissingEndMarker,

    #[error("invalid task id: {0}")]
    InvalidId(String),

    #[error("invalid number for {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid task json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read task file: {0}")]
    Io(#[from] std::io::Error),
}

impl InputError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NoTasks
            | Self::InvalidMetadataLine(_)
            | Self::MissingContentMarker
            | Self::MissingEndMarker
            | Self::Json(_) => ErrorCode::ParseError,
            Self::InvalidId(_) | Self::InvalidNumber { .. } => ErrorCode::ValidationError,
            Self::Io(_) => ErrorCode::IoError,
        }
    }
}
