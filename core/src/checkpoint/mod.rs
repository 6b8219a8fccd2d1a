//! Durable checkpoints and resume planning.

mod manager;
mod store;
mod types;

pub use manager::{plan_resume, CheckpointManager, ResumeOptions, ResumePlan};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use types::{Checkpoint, CHECKPOINT_VERSION};
