pub mod executor;
pub mod sink;
pub mod strategy;

pub use executor::*;
pub use sink::*;
pub use strategy::*;
