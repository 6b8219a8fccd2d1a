pub mod checkpoint;
pub mod code;
#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;
pub mod input;

pub use checkpoint::CheckpointError;
pub use code::ErrorCode;
pub use error::CliError;
pub use executor::ExecutorError;
pub use input::InputError;
