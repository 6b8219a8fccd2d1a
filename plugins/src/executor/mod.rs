pub mod command;
pub mod echo;
pub mod renderers;
pub mod strategies;

pub use command::CommandExecutor;
pub use echo::EchoExecutor;
pub use renderers::{JsonlRenderer, TextRenderer};
pub use strategies::{ExponentialBackoffPlugin, LinearRetryPlugin};
