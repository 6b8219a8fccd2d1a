use std::sync::Arc;

use anyhow::{anyhow, Result};

use weft_core::api::{
    AppConfig, EventSink, Executor, ExecutorRegistry, RetryConfig, RetryStrategyPlugin, RouteKind,
};

use crate::executor::{
    CommandExecutor, EchoExecutor, ExponentialBackoffPlugin, JsonlRenderer, LinearRetryPlugin,
    TextRenderer,
};

/// Route that is always available unless the config overrides it.
pub const BUILTIN_ECHO_ROUTE: &str = "echo";

/// One executor per configured route, plus the built-in `echo` route.
/// `default_route`, when set, must name a configured route and becomes the
/// fallback for unknown task types.
pub fn build_registry(cfg: &AppConfig) -> Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    registry.register(BUILTIN_ECHO_ROUTE, Arc::new(EchoExecutor::new()));

    for (name, route) in &cfg.routes {
        let executor: Arc<dyn Executor> = match route.kind {
            RouteKind::Command => Arc::new(CommandExecutor::from_config(name, route)?),
            RouteKind::Echo => Arc::new(EchoExecutor::new()),
        };
        registry.register(name.clone(), executor);
    }

    if let Some(default_route) = cfg.default_route.as_deref() {
        if !registry.contains(default_route) {
            return Err(anyhow!("default_route '{default_route}' is not a configured route"));
        }
        if let Some(fallback) = registry.resolve(default_route) {
            registry.set_fallback(fallback);
        }
    }

    tracing::debug!(routes = ?registry.routes(), fallback = registry.has_fallback(), "executor registry built");
    Ok(registry)
}

pub fn build_retry_strategy(cfg: &RetryConfig) -> Arc<dyn RetryStrategyPlugin> {
    match cfg.strategy.as_str() {
        "linear" => Arc::new(LinearRetryPlugin::new(cfg.clone())),
        // Anything else behaves like exponential backoff.
        _ => Arc::new(ExponentialBackoffPlugin::new(cfg.clone())),
    }
}

/// Terminal renderer for `--output`. `"none"` renders nothing.
pub fn build_renderer(format: &str, ascii_only: bool) -> Option<Arc<dyn EventSink>> {
    match format {
        "none" => None,
        "jsonl" => Some(Arc::new(JsonlRenderer::new(false))),
        "jsonl-pretty" => Some(Arc::new(JsonlRenderer::new(true))),
        _ => Some(Arc::new(TextRenderer::new(ascii_only))),
    }
}
