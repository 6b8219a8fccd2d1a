use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable progress on stderr.
    Text,
    /// One JSON event per line on stdout.
    Jsonl,
    /// Only the final summary.
    None,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Jsonl => "jsonl",
            Self::None => "none",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "weft", version, about = "Dependency-aware task runner")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file; defaults to $WEFT_HOME/config.toml, then ./weft.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TasksArg {
    /// Task file (JSON or task blocks). `-` reads stdin.
    #[arg(long, short = 't')]
    pub tasks: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub input: TasksArg,

    /// Print batches as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: TasksArg,

    #[arg(long)]
    pub max_parallel: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Do not write checkpoints for this run.
    #[arg(long, conflicts_with = "checkpoint_every")]
    pub no_checkpoint: bool,

    /// Checkpoint after every N completed tasks instead of after every batch.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_every: Option<u64>,

    /// Default per-call timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
#[command(group(clap::ArgGroup::new("from").required(true).args(["checkpoint", "latest"])))]
pub struct ResumeArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Checkpoint to resume from.
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Resume from the newest checkpoint (of `--run`, if given).
    #[arg(long)]
    pub latest: bool,

    #[arg(long = "run", requires = "latest")]
    pub run_id: Option<String>,

    /// Keep previously failed tasks failed instead of retrying them.
    #[arg(long)]
    pub skip_failed: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CheckpointsArgs {
    /// Only list checkpoints of this run.
    #[arg(long = "run")]
    pub run_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve and print execution batches without running anything.
    Plan(PlanArgs),
    /// Run a task file.
    Run(RunArgs),
    /// Continue a run from a checkpoint.
    Resume(ResumeArgs),
    /// List stored checkpoints.
    Checkpoints(CheckpointsArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags() {
        let args = Args::try_parse_from([
            "weft",
            "run",
            "--tasks",
            "t.json",
            "--max-parallel",
            "3",
            "--format",
            "jsonl",
            "--checkpoint-every",
            "5",
        ])
        .unwrap();
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.input.tasks, "t.json");
        assert_eq!(run.max_parallel, Some(3));
        assert_eq!(run.format, OutputFormat::Jsonl);
        assert_eq!(run.checkpoint_every, Some(5));
    }

    #[test]
    fn checkpoint_flags_conflict() {
        let err = Args::try_parse_from([
            "weft",
            "run",
            "-t",
            "t.json",
            "--no-checkpoint",
            "--checkpoint-every",
            "2",
        ]);
        assert!(err.is_err());
        assert!(Args::try_parse_from(["weft", "run", "-t", "t", "--checkpoint-every", "0"]).is_err());
    }

    #[test]
    fn resume_needs_a_source() {
        assert!(Args::try_parse_from(["weft", "resume", "-t", "t.json"]).is_err());
        assert!(Args::try_parse_from(["weft", "resume", "-t", "t.json", "--run", "r1"]).is_err());

        let args = Args::try_parse_from([
            "weft",
            "resume",
            "-t",
            "t.json",
            "--latest",
            "--run",
            "r1",
            "--skip-failed",
        ])
        .unwrap();
        let Commands::Resume(resume) = args.command else {
            panic!("expected resume");
        };
        assert!(resume.latest);
        assert!(resume.skip_failed);
        assert_eq!(resume.run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn global_config_flag() {
        let args = Args::try_parse_from(["weft", "checkpoints", "--config", "/tmp/w.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/w.toml")));
    }
}
