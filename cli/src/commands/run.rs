use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use weft_core::api::{
    self as core_api, AppContext, CheckpointCadence, CheckpointError, CliError, ExecutionEngine,
    ExecutionOpts, ExecutionResult, ResumeOptions, Task, TaskStatus,
};
use weft_plugins::factory;

use super::checkpoints::checkpoint_manager;
use super::cli::{OutputFormat, PlanArgs, ResumeArgs, RunArgs, TasksArg};
use super::exit_code_for_result;

pub async fn read_tasks(input: &TasksArg) -> Result<Vec<Task>, CliError> {
    if input.tasks == "-" {
        return read_tasks_from(tokio::io::stdin()).await;
    }
    Ok(core_api::load_tasks_from_file(Path::new(&input.tasks)).await?)
}

async fn read_tasks_from<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<Task>, CliError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf).await?;
    Ok(core_api::parse_tasks(&buf)?)
}

/// Config values overridden by command line flags.
pub fn execution_opts(ctx: &AppContext, args: &RunArgs) -> ExecutionOpts {
    let mut opts = ExecutionOpts::from_config(ctx.cfg());
    if let Some(n) = args.max_parallel {
        opts.max_parallel = n.max(1);
    }
    if let Some(secs) = args.timeout {
        opts.default_timeout = Some(Duration::from_secs(secs));
    }
    if args.no_checkpoint {
        opts.checkpoint_cadence = CheckpointCadence::Never;
    } else if let Some(every) = args.checkpoint_every {
        opts.checkpoint_cadence = CheckpointCadence::Tasks {
            every: every as usize,
        };
    }
    // Bars and per-event text lines would fight over stderr; bars win on a terminal.
    opts.progress_bar =
        opts.progress_bar && args.format == OutputFormat::Text && atty::is(atty::Stream::Stderr);
    opts
}

fn build_engine<'a>(ctx: &'a AppContext, opts: &'a ExecutionOpts, format: OutputFormat) -> ExecutionEngine<'a> {
    let mut builder = ExecutionEngine::builder(ctx, opts)
        .retry_strategy(factory::build_retry_strategy(&ctx.cfg().executor.retry));
    if !opts.progress_bar {
        let ascii_only = !atty::is(atty::Stream::Stderr);
        if let Some(renderer) = factory::build_renderer(format.as_str(), ascii_only) {
            builder = builder.sink(renderer);
        }
    }
    builder.build()
}

/// Cancel cooperatively on the first Ctrl-C. In-flight calls finish; nothing
/// new is submitted.
fn cancel_on_ctrl_c<F>(cancel: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            eprintln!("interrupted: waiting for running tasks to finish (Ctrl-C again to abort)");
            cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
}

pub async fn handle_plan(args: PlanArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let tasks = read_tasks(&args.input).await?;
    let opts = ExecutionOpts::from_config(ctx.cfg());
    let batches = ExecutionEngine::new(ctx, &opts).plan(&tasks)?;

    if args.json {
        let out = serde_json::to_string_pretty(&json!({ "batches": batches }))
            .map_err(|e| CliError::Command(e.to_string()))?;
        println!("{out}");
    } else {
        for (idx, batch) in batches.iter().enumerate() {
            println!("batch {idx}: {}", batch.join(", "));
        }
    }
    Ok(0)
}

pub async fn handle_run(args: RunArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let tasks = read_tasks(&args.input).await?;
    let opts = execution_opts(ctx, &args);
    let engine = build_engine(ctx, &opts, args.format);

    let token = engine.cancel_token();
    cancel_on_ctrl_c(move || token.cancel());

    let result = engine.run_tasks(&tasks).await?;
    report(&result, &args);
    Ok(exit_code_for_result(&result))
}

pub async fn handle_resume(args: ResumeArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let checkpoint_id = match args.checkpoint {
        Some(id) => id,
        None => checkpoint_manager(ctx)?
            .latest(args.run_id.as_deref())
            .await?
            .map(|cp| cp.checkpoint_id)
            .ok_or_else(|| {
                CheckpointError::NotFound(match &args.run_id {
                    Some(run) => format!("no checkpoint for run {run}"),
                    None => "no checkpoints stored".to_string(),
                })
            })?,
    };

    let tasks = read_tasks(&args.run.input).await?;
    let opts = execution_opts(ctx, &args.run);
    let engine = build_engine(ctx, &opts, args.run.format);

    let token = engine.cancel_token();
    cancel_on_ctrl_c(move || token.cancel());

    let options = ResumeOptions {
        retry_failed: !args.skip_failed,
    };
    let result = engine.resume(&checkpoint_id, &tasks, options).await?;
    report(&result, &args.run);
    Ok(exit_code_for_result(&result))
}

fn report(result: &ExecutionResult, args: &RunArgs) {
    match args.format {
        OutputFormat::Jsonl => println!("{}", summary_json(result)),
        OutputFormat::Text | OutputFormat::None => print!("{}", summary_text(result, &args.input.tasks)),
    }
}

fn summary_json(result: &ExecutionResult) -> serde_json::Value {
    let mut ids: Vec<&String> = result.outcomes.keys().collect();
    ids.sort();
    let tasks: serde_json::Map<String, serde_json::Value> = ids
        .into_iter()
        .filter_map(|id| {
            let outcome = result.outcomes.get(id)?;
            Some((id.clone(), serde_json::to_value(outcome).ok()?))
        })
        .collect();
    json!({
        "event_type": "run.summary",
        "run_id": result.run_id,
        "success": result.success,
        "cancelled": result.cancelled,
        "duration_ms": result.duration_ms,
        "last_checkpoint": result.last_checkpoint,
        "tasks": tasks,
        "state": result.state.values(),
    })
}

fn summary_text(result: &ExecutionResult, tasks_path: &str) -> String {
    let status = if result.cancelled {
        "CANCELLED"
    } else if result.success {
        "SUCCESS"
    } else {
        "FAILED"
    };
    let mut out = format!(
        "run {}: {status} in {}ms\n  succeeded {}, failed {}, skipped {}, not run {}\n",
        result.run_id,
        result.duration_ms,
        result.succeeded(),
        result.failed(),
        result.skipped(),
        result.not_run()
    );

    let mut problems: Vec<_> = result
        .outcomes
        .values()
        .filter(|o| matches!(o.status, TaskStatus::Failed | TaskStatus::Skipped))
        .collect();
    problems.sort_by(|a, b| (a.batch_index, &a.task_id).cmp(&(b.batch_index, &b.task_id)));
    for outcome in problems {
        if let Some(error) = &outcome.error {
            out.push_str(&format!("  {}: {error}\n", outcome.task_id));
        }
    }

    if let Some(checkpoint) = &result.last_checkpoint {
        if !result.success || result.cancelled {
            out.push_str(&format!(
                "resume with: weft resume --tasks {tasks_path} --checkpoint {checkpoint}\n"
            ));
        }
    }
    out
}
