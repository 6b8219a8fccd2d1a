/// Numeric error codes shared by every error family.
///
/// Finer grained than process exit codes; the CLI prints them with the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    GeneralError = 1,
    ParseError = 2,
    ValidationError = 3,
    TaskNotFound = 10,
    DependencyError = 11,
    CircularDependency = 12,
    RouteNotFound = 13,
    InvalidGraph = 14,
    TaskFailed = 20,
    Timeout = 30,
    Cancelled = 31,
    CheckpointNotFound = 40,
    CheckpointCorrupt = 41,
    CheckpointStore = 42,
    ConfigError = 50,
    IoError = 60,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}
