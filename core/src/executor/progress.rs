use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::types::{TaskOutcome, TaskStatus};

/// Terminal progress for a batch run.
///
/// One overall bar plus a spinner per in-flight task. Hidden when disabled,
/// so callers never need to branch on it.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: Mutex<HashMap<String, ProgressBar>>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: Mutex::new(HashMap::new()),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks ({percent}%) {msg}")
        {
            overall.set_style(style.progress_chars("█▓▒░  "));
        }
        overall.set_message("Starting...");

        Self {
            multi,
            overall,
            task_bars: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn start_task(&self, task_id: &str) {
        if !self.enabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.green} {msg}") {
            bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        bar.set_message(format!("⏳ {}", task_id));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut bars) = self.task_bars.lock() {
            bars.insert(task_id.to_string(), bar);
        }
    }

    pub fn finish_task(&self, outcome: &TaskOutcome) {
        if !self.enabled {
            return;
        }

        let bar = self
            .task_bars
            .lock()
            .ok()
            .and_then(|mut bars| bars.remove(&outcome.task_id));
        let icon = match outcome.status {
            TaskStatus::Succeeded => "✅",
            TaskStatus::Failed => "❌",
            TaskStatus::Skipped => "⏭",
            TaskStatus::NotRun => "⏹",
        };
        let line = format!("{} {} ({}ms)", icon, outcome.task_id, outcome.duration_ms);
        match bar {
            Some(bar) => bar.finish_with_message(line),
            None => self.overall.println(line),
        }

        self.overall.inc(1);
    }

    pub fn update_batch(&self, batch_index: usize, total_batches: usize) {
        if self.enabled {
            self.overall
                .set_message(format!("Batch {}/{}", batch_index + 1, total_batches));
        }
    }

    pub fn finish(&self, success: bool, cancelled: bool) {
        if !self.enabled {
            return;
        }

        let msg = if cancelled {
            "⏹ Run cancelled"
        } else if success {
            "✅ All tasks completed"
        } else {
            "❌ Run finished with failures"
        };

        self.overall.finish_with_message(msg.to_string());
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        if let Ok(mut bars) = self.task_bars.lock() {
            for (_, bar) in bars.drain() {
                bar.finish_and_clear();
            }
        }
    }
}
