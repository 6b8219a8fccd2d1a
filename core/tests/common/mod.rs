#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use weft_core::api::{
    AppConfig, AppContext, CheckpointCadence, EventSink, ExecutionEvent, ExecutionOpts,
    ExecutionRequest, Executor, ExecutorOutput, ExecutorRegistry, Task,
};

pub const ROUTE: &str = "test";

/// How the scripted executor answers for one task id.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(Value),
    Fail(&'static str),
    /// Fail this many calls, then succeed.
    FailTimes(usize),
    /// Sleep, then succeed.
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub id: String,
    pub attempt: u32,
    pub dependency_results: Vec<String>,
}

/// Executor whose answers are scripted per task id. Unscripted ids succeed
/// with `{"id": <id>}` after a short sleep.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: HashMap<String, Behavior>,
    calls: Mutex<Vec<Call>>,
    failures_seen: Mutex<HashMap<String, usize>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, id: &str, behavior: Behavior) -> Self {
        self.script.insert(id.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.id).collect()
    }

    pub fn call_count(&self, id: &str) -> usize {
        self.calls().iter().filter(|c| c.id == id).count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        _timeout: Option<Duration>,
    ) -> anyhow::Result<ExecutorOutput> {
        self.calls.lock().unwrap().push(Call {
            id: request.id.clone(),
            attempt: request.attempt,
            dependency_results: request.dependency_results.keys().cloned().collect(),
        });
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let behavior = self
            .script
            .get(&request.id)
            .cloned()
            .unwrap_or(Behavior::Sleep(Duration::from_millis(5)));
        let output = match behavior {
            Behavior::Succeed(value) => ExecutorOutput::ok(value),
            Behavior::Fail(msg) => ExecutorOutput::failed(msg),
            Behavior::FailTimes(n) => {
                let mut seen = self.failures_seen.lock().unwrap();
                let count = seen.entry(request.id.clone()).or_insert(0);
                if *count < n {
                    *count += 1;
                    ExecutorOutput::failed("transient")
                } else {
                    ExecutorOutput::ok(json!({ "id": request.id }))
                }
            }
            Behavior::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                ExecutorOutput::ok(json!({ "id": request.id }))
            }
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}

/// Sink that keeps every event it sees.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl CollectingSink {
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type())
            .collect()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn emit(&self, event: &ExecutionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn task(id: &str, deps: &[&str]) -> Task {
    Task::new(id, ROUTE).depends_on(deps.iter().copied())
}

pub fn context(executor: Arc<ScriptedExecutor>) -> AppContext {
    let registry = ExecutorRegistry::new().with_route(ROUTE, executor);
    AppContext::from_parts(AppConfig::default(), registry)
}

pub fn opts(max_parallel: usize) -> ExecutionOpts {
    ExecutionOpts {
        max_parallel,
        default_timeout: None,
        block_dependents_on_failure: true,
        checkpoint_cadence: CheckpointCadence::Batch,
        progress_bar: false,
    }
}
