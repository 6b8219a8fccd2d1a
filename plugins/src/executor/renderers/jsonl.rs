use weft_core::api::{event_line, EventSink, ExecutionEvent};

/// Prints every engine event to stdout as one JSON line, using the same
/// envelope as the events file.
pub struct JsonlRenderer {
    pretty_print: bool,
}

impl JsonlRenderer {
    pub fn new(pretty_print: bool) -> Self {
        Self { pretty_print }
    }

    fn render(&self, event: &ExecutionEvent) -> Option<String> {
        let line = event_line(event)?;
        if !self.pretty_print {
            return Some(line);
        }
        let value: serde_json::Value = serde_json::from_str(&line).ok()?;
        serde_json::to_string_pretty(&value).ok()
    }
}

impl EventSink for JsonlRenderer {
    fn name(&self) -> &str {
        "jsonl-renderer"
    }

    fn emit(&self, event: &ExecutionEvent) {
        if let Some(out) = self.render(event) {
            println!("{out}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::api::TaskOutcome;

    #[test]
    fn task_completion_carries_outcome() {
        let renderer = JsonlRenderer::new(false);
        let line = renderer
            .render(&ExecutionEvent::TaskCompleted {
                run_id: "run".to_string(),
                outcome: TaskOutcome::skipped("b", 1, "a"),
            })
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event_type"], "task.completed");
        assert_eq!(value["run_id"], "run");
        assert_eq!(value["data"]["outcome"]["status"], "skipped");
        assert_eq!(value["data"]["outcome"]["error"]["dependency"], "a");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn pretty_output_spans_lines() {
        let renderer = JsonlRenderer::new(true);
        let out = renderer
            .render(&ExecutionEvent::RunStarted {
                run_id: "run".to_string(),
                total_tasks: 2,
                total_batches: 1,
            })
            .unwrap();
        assert!(out.contains('\n'));
        assert!(out.contains("run.started"));
    }
}
