use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use weft_core::api::{ExecutionRequest, Executor, ExecutorOutput};

/// Hands the prompt back as the result. Useful for dry runs and wiring tests.
#[derive(Debug, Default, Clone)]
pub struct EchoExecutor;

impl EchoExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for EchoExecutor {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        _timeout: Option<Duration>,
    ) -> anyhow::Result<ExecutorOutput> {
        tracing::debug!(id = %request.id, attempt = request.attempt, "echo");
        Ok(ExecutorOutput::ok(Value::String(request.prompt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_prompt() {
        let out = EchoExecutor::new()
            .execute(
                ExecutionRequest {
                    id: "a".into(),
                    prompt: "hello".into(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.result, Value::String("hello".into()));
    }
}
