use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use weft_core::api::{ExecutionRequest, Executor, ExecutorOutput, RouteConfig};

const STDERR_TAIL_CHARS: usize = 2000;

/// Runs one subprocess per call.
///
/// The prompt is written to stdin. Stdout becomes the result: parsed as JSON
/// when it is JSON, otherwise kept as a string. A non-zero exit is a task
/// failure carrying the tail of stderr. The child is killed when the call is
/// dropped (timeout or cancellation).
///
/// Call details are exported to the child as `WEFT_TASK_ID`, `WEFT_RUN_ID`,
/// `WEFT_ROUTE`, `WEFT_ATTEMPT` and `WEFT_DEPENDENCIES` (JSON object).
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    route: String,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    default_timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new(route: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            default_timeout: None,
        }
    }

    pub fn from_config(route: &str, cfg: &RouteConfig) -> Result<Self> {
        let program = cfg
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("route '{route}': command routes need a `command`"))?;

        let mut executor = Self::new(route, program).with_args(cfg.args.clone());
        executor.env = cfg.env.clone();
        executor.working_dir = cfg.working_dir.as_ref().map(PathBuf::from);
        executor.default_timeout = cfg.timeout_secs.map(Duration::from_secs);
        Ok(executor)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn name(&self) -> &str {
        &self.route
    }

    async fn execute(&self, request: ExecutionRequest, timeout: Option<Duration>) -> Result<ExecutorOutput> {
        let dependencies = serde_json::to_string(&request.dependency_results)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .env("WEFT_TASK_ID", &request.id)
            .env("WEFT_RUN_ID", &request.run_id)
            .env("WEFT_ROUTE", &request.route)
            .env("WEFT_ATTEMPT", request.attempt.to_string())
            .env("WEFT_DEPENDENCIES", dependencies)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            route = %self.route,
            program = %self.program,
            id = %request.id,
            attempt = request.attempt,
            "spawning command"
        );
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program))?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&prompt).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        tracing::debug!(error = %e, "writing prompt to child stdin failed");
                    }
                }
            });
        }

        let wait = child.wait_with_output();
        let output = match timeout.or(self.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| anyhow!("'{}' timed out after {}ms", self.program, limit.as_millis()))??,
            None => wait.await?,
        };

        let result = parse_stdout(&output.stdout);
        if output.status.success() {
            return Ok(ExecutorOutput::ok(result));
        }

        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = tail(stderr.trim(), STDERR_TAIL_CHARS);
        let message = if stderr.is_empty() {
            format!("'{}' exited with {code}", self.program)
        } else {
            format!("'{}' exited with {code}: {stderr}", self.program)
        };
        Ok(ExecutorOutput {
            result,
            success: false,
            error: Some(message),
        })
    }
}

fn parse_stdout(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn tail(text: &str, max_chars: usize) -> &str {
    match text.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) if idx > 0 => &text[idx..],
        _ => text,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn sh(script: &str) -> CommandExecutor {
        CommandExecutor::new("shell", "sh").with_args(vec!["-c".into(), script.into()])
    }

    fn request(id: &str, prompt: &str) -> ExecutionRequest {
        ExecutionRequest {
            id: id.into(),
            run_id: "run-1".into(),
            route: "shell".into(),
            prompt: prompt.into(),
            attempt: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn prompt_goes_to_stdin() {
        let out = sh("cat").execute(request("a", "hello there"), None).await.unwrap();
        assert!(out.success);
        assert_eq!(out.result, json!("hello there"));
    }

    #[tokio::test]
    async fn json_stdout_is_parsed() {
        let out = sh(r#"printf '{"n": 3}'"#)
            .execute(request("a", ""), None)
            .await
            .unwrap();
        assert_eq!(out.result, json!({ "n": 3 }));
    }

    #[tokio::test]
    async fn call_details_are_exported() {
        let mut req = request("fetch", "");
        req.dependency_results.insert("up".into(), json!(1));
        let out = sh(r#"printf '%s|%s' "$WEFT_TASK_ID" "$WEFT_DEPENDENCIES""#)
            .with_env("UNUSED", "x")
            .execute(req, None)
            .await
            .unwrap();
        assert_eq!(out.result, json!(r#"fetch|{"up":1}"#));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let out = sh("echo partial; echo broken >&2; exit 3")
            .execute(request("a", ""), None)
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.result, json!("partial"));
        let error = out.error.unwrap();
        assert!(error.contains("exited with 3"), "{error}");
        assert!(error.contains("broken"), "{error}");
    }

    #[tokio::test]
    async fn route_timeout_applies_without_task_timeout() {
        let err = sh("sleep 5")
            .with_timeout(Duration::from_millis(50))
            .execute(request("a", ""), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = CommandExecutor::new("x", "/definitely/not/here")
            .execute(request("a", ""), None)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to spawn"));
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("héllo", 4), "éllo");
    }
}
