use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::traits::Executor;

/// Maps a task's routing key (`task_type`) to the executor that runs it.
///
/// Lookups happen once per run, before any task is submitted, so a missing
/// route is a structural error rather than a per-task failure.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    routes: HashMap<String, Arc<dyn Executor>>,
    fallback: Option<Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: impl Into<String>, executor: Arc<dyn Executor>) -> &mut Self {
        self.routes.insert(route.into(), executor);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(route, executor);
        self
    }

    /// Executor used for routes with no explicit entry.
    pub fn set_fallback(&mut self, executor: Arc<dyn Executor>) -> &mut Self {
        self.fallback = Some(executor);
        self
    }

    pub fn with_fallback(mut self, executor: Arc<dyn Executor>) -> Self {
        self.set_fallback(executor);
        self
    }

    pub fn resolve(&self, route: &str) -> Option<Arc<dyn Executor>> {
        self.routes
            .get(route)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, route: &str) -> bool {
        self.routes.contains_key(route)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Registered routes, sorted.
    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.fallback.is_none()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("routes", &self.routes())
            .field("fallback", &self.fallback.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}
