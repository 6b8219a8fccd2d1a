use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::ExecutorError;
use crate::executor::registry::ExecutorRegistry;
use crate::executor::traits::{ExecutionRequest, Executor};

use super::state::{HandlerOutput, WorkflowState};

/// Per-invocation information handed to a node handler.
#[derive(Debug, Clone)]
pub struct NodeContext<'a> {
    pub run_id: &'a str,
    pub node_id: &'a str,
    pub config: &'a BTreeMap<String, Value>,
    pub timeout: Option<Duration>,
}

/// Work performed when the runner enters a node.
///
/// Handlers read the state and return an update; the runner applies it.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, ctx: &NodeContext<'_>, state: &WorkflowState) -> anyhow::Result<HandlerOutput>;
}

struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> NodeHandler for FnHandler<F, Fut>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send,
{
    async fn handle(&self, _ctx: &NodeContext<'_>, state: &WorkflowState) -> anyhow::Result<HandlerOutput> {
        (self.f)(state.clone()).await
    }
}

/// Wrap an async closure as a handler. The closure receives a copy of the state.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn NodeHandler>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
{
    Arc::new(FnHandler { f, _fut: PhantomData })
}

/// Runs a node through a registered executor and stores the result under
/// `output_key`.
///
/// `{{key}}` placeholders in the prompt are filled from the state before the
/// call; missing keys render as empty strings.
pub struct ExecutorHandler {
    route: String,
    executor: Arc<dyn Executor>,
    prompt: String,
    output_key: String,
}

impl ExecutorHandler {
    /// Resolves the route once, up front.
    pub fn from_registry(
        registry: &ExecutorRegistry,
        route: &str,
        prompt: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Result<Self, ExecutorError> {
        let executor = registry
            .resolve(route)
            .ok_or_else(|| ExecutorError::UnknownRoute {
                task_id: "<graph node>".to_string(),
                route: route.to_string(),
            })?;
        Ok(Self {
            route: route.to_string(),
            executor,
            prompt: prompt.into(),
            output_key: output_key.into(),
        })
    }

    pub fn into_handler(self) -> Arc<dyn NodeHandler> {
        Arc::new(self)
    }
}

#[async_trait]
impl NodeHandler for ExecutorHandler {
    async fn handle(&self, ctx: &NodeContext<'_>, state: &WorkflowState) -> anyhow::Result<HandlerOutput> {
        let request = ExecutionRequest {
            id: ctx.node_id.to_string(),
            run_id: ctx.run_id.to_string(),
            route: self.route.clone(),
            prompt: render_template(&self.prompt, state),
            attempt: 1,
            dependency_results: BTreeMap::new(),
            metadata: ctx.config.clone(),
        };

        let output = self.executor.execute(request, ctx.timeout).await?;
        if !output.success {
            anyhow::bail!(
                "{} failed: {}",
                self.executor.name(),
                output.error.unwrap_or_else(|| "executor reported failure".to_string())
            );
        }

        Ok(HandlerOutput::set(self.output_key.clone(), output.result))
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Fill `{{key}}` placeholders from state values. Strings are inserted
/// verbatim, other values as compact JSON.
pub fn render_template(template: &str, state: &WorkflowState) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures<'_>| match state.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn template_fills_known_keys() {
        let state = WorkflowState::from_values([
            ("name", json!("weft")),
            ("count", json!(3)),
        ]);
        assert_eq!(
            render_template("{{name}} x{{ count }} {{missing}}!", &state),
            "weft x3 !"
        );
    }

    #[tokio::test]
    async fn closure_handler_sees_state_copy() {
        let handler = handler_fn(|state| async move {
            let n = state.get_as::<i64>("n").unwrap_or(0);
            Ok(HandlerOutput::set("n", n + 1))
        });
        let config = BTreeMap::new();
        let ctx = NodeContext {
            run_id: "r",
            node_id: "inc",
            config: &config,
            timeout: None,
        };
        let state = WorkflowState::from_values([("n", json!(41))]);

        let out = handler.handle(&ctx, &state).await.unwrap();
        assert_eq!(out, HandlerOutput::set("n", 42));
        assert_eq!(state.get("n"), Some(&json!(41)));
    }
}
