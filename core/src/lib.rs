//! Dependency-aware task and workflow execution.
//!
//! - [`executor`]: resolve a flat task list into batches and run them.
//! - [`workflow`]: walk graph workflows with conditions, parallel splits and loops.
//! - [`checkpoint`]: durable snapshots and resume planning.

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod events_out;
pub mod executor;
pub mod input;
pub mod workflow;
