use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A unit of work handed over by a task producer.
///
/// The engine never inspects `prompt` or `task_type`; it only checks that the
/// dependency graph formed by `depends_on` is well formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Empty ids are filled in by the input layer.
    #[serde(default)]
    pub id: String,

    /// Opaque payload forwarded to the executor.
    #[serde(default, alias = "payload", alias = "content")]
    pub prompt: String,

    /// Routing key used to pick an executor from the registry.
    #[serde(default, alias = "type", alias = "backend")]
    pub task_type: String,

    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<String>,

    /// Higher runs first inside a batch. Only affects ordering, never correctness.
    #[serde(default)]
    pub priority: i32,

    /// Per-call timeout in seconds; falls back to the engine default.
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,

    /// Retries after the first attempt; overrides the retry strategy budget.
    #[serde(default)]
    pub retry: Option<u32>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: String::new(),
            task_type: task_type.into(),
            depends_on: Vec::new(),
            priority: 0,
            timeout_secs: None,
            retry: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Common task interface for executor graph handling.
pub trait TaskLike: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
    fn priority(&self) -> i32 {
        0
    }
}

impl TaskLike for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
