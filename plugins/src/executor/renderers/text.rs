use weft_core::api::{EventSink, ExecutionEvent, TaskStatus};

/// Human-readable one-line-per-event output on stderr, leaving stdout for
/// results.
pub struct TextRenderer {
    ascii_only: bool,
}

impl TextRenderer {
    pub fn new(ascii_only: bool) -> Self {
        Self { ascii_only }
    }

    fn mark(&self, ok: bool) -> &'static str {
        match (ok, self.ascii_only) {
            (true, true) => "OK",
            (true, false) => "✓",
            (false, true) => "FAIL",
            (false, false) => "✗",
        }
    }

    fn format_event(&self, event: &ExecutionEvent) -> Option<String> {
        let line = match event {
            ExecutionEvent::RunStarted {
                run_id,
                total_tasks,
                total_batches,
            } => format!("RUN START {run_id} (tasks: {total_tasks}, batches: {total_batches})"),
            ExecutionEvent::Plan { run_id, batches } => {
                let mut out = format!("PLAN {run_id}:");
                for (idx, batch) in batches.iter().enumerate() {
                    out.push_str(&format!("\n  batch {idx}: {}", batch.join(", ")));
                }
                out
            }
            ExecutionEvent::BatchStarted {
                batch_index,
                task_ids,
                ..
            } => format!("BATCH {batch_index} START ({} tasks)", task_ids.len()),
            ExecutionEvent::TaskStarted { task_id, attempt, .. } if *attempt > 1 => {
                format!("  RETRY {task_id} (attempt {attempt})")
            }
            ExecutionEvent::TaskStarted { .. } => return None,
            ExecutionEvent::TaskCompleted { outcome, .. } => {
                let detail = outcome
                    .error
                    .as_ref()
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default();
                match outcome.status {
                    TaskStatus::Succeeded => format!(
                        "  {} {} ({}ms)",
                        self.mark(true),
                        outcome.task_id,
                        outcome.duration_ms
                    ),
                    TaskStatus::Failed => format!(
                        "  {} {} ({}ms, {} attempts){detail}",
                        self.mark(false),
                        outcome.task_id,
                        outcome.duration_ms,
                        outcome.attempts
                    ),
                    TaskStatus::Skipped => format!("  SKIP {}{detail}", outcome.task_id),
                    TaskStatus::NotRun => format!("  NOT RUN {}", outcome.task_id),
                }
            }
            ExecutionEvent::BatchCompleted {
                batch_index,
                succeeded,
                failed,
                skipped,
                ..
            } => format!(
                "BATCH {batch_index} END (succeeded {succeeded}, failed {failed}, skipped {skipped})"
            ),
            ExecutionEvent::NodeStarted { .. } => return None,
            ExecutionEvent::NodeCompleted {
                node_id,
                success,
                duration_ms,
                ..
            } => format!("  {} {node_id} ({duration_ms}ms)", self.mark(*success)),
            ExecutionEvent::CheckpointSaved {
                checkpoint_id,
                batch_index,
                ..
            } => format!("CHECKPOINT {checkpoint_id} (next batch {batch_index})"),
            ExecutionEvent::RunCompleted {
                run_id,
                success,
                cancelled,
                duration_ms,
            } => {
                let status = if *cancelled {
                    "CANCELLED"
                } else if *success {
                    "SUCCESS"
                } else {
                    "FAILED"
                };
                format!("RUN END {run_id} ({status}, {duration_ms}ms)")
            }
        };
        Some(line)
    }
}

impl EventSink for TextRenderer {
    fn name(&self) -> &str {
        "text-renderer"
    }

    fn emit(&self, event: &ExecutionEvent) {
        if let Some(line) = self.format_event(event) {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::api::{TaskError, TaskOutcome};

    #[test]
    fn failed_task_shows_reason() {
        let renderer = TextRenderer::new(true);
        let outcome = TaskOutcome {
            task_id: "fetch".to_string(),
            status: TaskStatus::Failed,
            batch_index: 0,
            result: None,
            error: Some(TaskError::Timeout { after_ms: 500 }),
            duration_ms: 501,
            attempts: 2,
        };
        let line = renderer
            .format_event(&ExecutionEvent::TaskCompleted {
                run_id: "run".to_string(),
                outcome,
            })
            .unwrap();

        assert!(line.contains("FAIL fetch"));
        assert!(line.contains("2 attempts"));
        assert!(line.contains("timed out after 500ms"));
    }

    #[test]
    fn first_attempts_are_quiet() {
        let renderer = TextRenderer::new(true);
        let started = |attempt| ExecutionEvent::TaskStarted {
            run_id: "run".to_string(),
            task_id: "a".to_string(),
            batch_index: 0,
            attempt,
        };
        assert_eq!(renderer.format_event(&started(1)), None);
        assert!(renderer.format_event(&started(2)).unwrap().contains("RETRY a"));
    }

    #[test]
    fn plan_lists_batches() {
        let renderer = TextRenderer::new(false);
        let line = renderer
            .format_event(&ExecutionEvent::Plan {
                run_id: "run".to_string(),
                batches: vec![vec!["a".into(), "b".into()], vec!["c".into()]],
            })
            .unwrap();
        assert!(line.contains("batch 0: a, b"));
        assert!(line.contains("batch 1: c"));
    }
}
