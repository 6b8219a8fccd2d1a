use weft_core::api::{AppContext, CheckpointManager, CliError};

use super::cli::CheckpointsArgs;

/// Manager over the configured checkpoint directory.
pub fn checkpoint_manager(ctx: &AppContext) -> Result<CheckpointManager, CliError> {
    ctx.checkpoint_store()
        .map(CheckpointManager::new)
        .ok_or_else(|| CliError::Config("checkpointing is disabled (checkpoint.enabled = false)".to_string()))
}

pub async fn handle_checkpoints(args: CheckpointsArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let manager = checkpoint_manager(ctx)?;
    let checkpoints = manager.list().await?;

    let mut shown = 0usize;
    for checkpoint in checkpoints
        .iter()
        .filter(|cp| args.run_id.as_deref().map_or(true, |r| cp.run_id == r))
    {
        println!("{}", checkpoint.summary());
        shown += 1;
    }

    if shown == 0 {
        eprintln!("no checkpoints in {}", ctx.cfg().checkpoint.directory);
    }
    Ok(0)
}
