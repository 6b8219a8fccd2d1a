//! Task list parsing.
//!
//! Two hand-off formats are accepted from a task producer:
//!
//! ```text
//! ---TASK---
//! id: fetch
//! type: shell
//! depends-on: a, b
//! priority: 2
//! timeout: 30
//! retry: 1
//! ---CONTENT---
//! prompt text
//! ---END---
//! ```
//!
//! or JSON (an array of tasks, or `{ "tasks": [...] }`).

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::InputError;
use crate::executor::types::Task;

use super::id_gen::generate_task_id;

const TASK_MARKER: &str = "---TASK---";
const CONTENT_MARKER: &str = "---CONTENT---";
const END_MARKER: &str = "---END---";

/// Parse either format, picking JSON when the input starts with `[` or `{`.
pub fn parse_tasks(input: &str) -> Result<Vec<Task>, InputError> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        parse_json_tasks(trimmed)
    } else {
        parse_task_blocks(input)
    }
}

pub async fn load_tasks_from_file(path: &Path) -> Result<Vec<Task>, InputError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_tasks(&text)
}

pub fn parse_json_tasks(input: &str) -> Result<Vec<Task>, InputError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        List(Vec<Task>),
        Wrapped { tasks: Vec<Task> },
    }

    let tasks = match serde_json::from_str::<Document>(input)? {
        Document::List(tasks) | Document::Wrapped { tasks } => tasks,
    };
    finish(tasks)
}

pub fn parse_task_blocks(input: &str) -> Result<Vec<Task>, InputError> {
    let mut lines = input.lines();
    let mut tasks: Vec<Task> = Vec::new();

    while let Some(line) = lines.next() {
        if line.trim() != TASK_MARKER {
            continue;
        }

        let mut fields: Vec<(String, String)> = Vec::new();
        let mut saw_content_marker = false;

        for line in lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == CONTENT_MARKER {
                saw_content_marker = true;
                break;
            }
            let Some((k, v)) = trimmed.split_once(':') else {
                return Err(InputError::InvalidMetadataLine(trimmed.to_string()));
            };
            fields.push((k.trim().to_lowercase(), v.trim().to_string()));
        }

        if !saw_content_marker {
            return Err(InputError::MissingContentMarker);
        }

        let mut content_lines: Vec<&str> = Vec::new();
        let mut ended = false;
        for line in lines.by_ref() {
            if line.trim() == END_MARKER {
                ended = true;
                break;
            }
            content_lines.push(line);
        }

        if !ended {
            return Err(InputError::MissingEndMarker);
        }

        let mut task = Task::new(String::new(), String::new()).with_prompt(content_lines.join("\n"));
        for (key, value) in fields {
            match key.as_str() {
                "id" => task.id = value,
                "type" | "task-type" | "backend" => task.task_type = value,
                "depends-on" | "dependencies" => task.depends_on = split_csv(&value),
                "priority" => {
                    task.priority = value.parse().map_err(|_| InputError::InvalidNumber {
                        field: "priority",
                        value: value.clone(),
                    })?
                }
                "timeout" => task.timeout_secs = parse_number(&value, "timeout")?,
                "retry" => task.retry = parse_number(&value, "retry")?,
                _ => {
                    task.metadata.insert(key, Value::String(value));
                }
            }
        }
        tasks.push(task);
    }

    finish(tasks)
}

fn finish(mut tasks: Vec<Task>) -> Result<Vec<Task>, InputError> {
    if tasks.is_empty() {
        return Err(InputError::NoTasks);
    }
    for task in &mut tasks {
        if task.id.trim().is_empty() {
            task.id = generate_task_id();
        }
        validate_id(&task.id)?;
    }
    Ok(tasks)
}

/// Task ids are identifiers: a letter or `_`, then up to 127 of
/// `[A-Za-z0-9_.-]`. A few `_`-names and anything starting with `__` are
/// reserved.
pub fn validate_id(id: &str) -> Result<(), InputError> {
    static RESERVED: &[&str] = &["_root", "_start", "_end", "_all", "_none", "_self", "_parent"];
    if RESERVED.contains(&id) || id.starts_with("__") {
        return Err(InputError::InvalidId(id.to_string()));
    }
    static ID_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    let valid = ID_REGEX
        .get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_\-\.]{0,127}$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(id));
    if !valid {
        return Err(InputError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn split_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<N: std::str::FromStr>(value: &str, field: &'static str) -> Result<Option<N>, InputError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    value
        .trim()
        .parse::<N>()
        .map(Some)
        .map_err(|_| InputError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const TWO_TASKS: &str = r#"
---TASK---
id: fetch
type: shell
priority: 2
timeout: 30
retry: 1
model: small
---CONTENT---
curl example.com
---END---

---TASK---
id: summarize
type: echo
depends-on: fetch, fetch
---CONTENT---
line one
line two
---END---
"#;

    #[test]
    fn parses_task_blocks() {
        let tasks = parse_tasks(TWO_TASKS).unwrap();
        assert_eq!(tasks.len(), 2);

        let fetch = &tasks[0];
        assert_eq!(fetch.id, "fetch");
        assert_eq!(fetch.task_type, "shell");
        assert_eq!(fetch.priority, 2);
        assert_eq!(fetch.timeout_secs, Some(30));
        assert_eq!(fetch.retry, Some(1));
        assert_eq!(fetch.prompt, "curl example.com");
        assert_eq!(fetch.metadata.get("model"), Some(&json!("small")));

        let summarize = &tasks[1];
        assert_eq!(summarize.depends_on, vec!["fetch", "fetch"]);
        assert_eq!(summarize.prompt, "line one\nline two");
    }

    #[test]
    fn missing_id_is_generated() {
        let tasks = parse_tasks("---TASK---\ntype: echo\n---CONTENT---\nhi\n---END---\n").unwrap();
        assert!(tasks[0].id.starts_with("task-"));
    }

    #[test]
    fn structural_errors() {
        assert!(matches!(parse_tasks("nothing here"), Err(InputError::NoTasks)));
        assert!(matches!(
            parse_tasks("---TASK---\nid: a\n"),
            Err(InputError::MissingContentMarker)
        ));
        assert!(matches!(
            parse_tasks("---TASK---\nid: a\n---CONTENT---\nbody\n"),
            Err(InputError::MissingEndMarker)
        ));
        assert!(matches!(
            parse_tasks("---TASK---\njust words\n---CONTENT---\n---END---"),
            Err(InputError::InvalidMetadataLine(_))
        ));
        assert!(matches!(
            parse_tasks("---TASK---\nid: a\ntimeout: soon\n---CONTENT---\n---END---"),
            Err(InputError::InvalidNumber { field: "timeout", .. })
        ));
    }

    #[test]
    fn rejects_bad_and_reserved_ids() {
        for id in ["1abc", "has space", "_root", "__private"] {
            assert!(validate_id(id).is_err(), "{id} should be rejected");
        }
        assert!(validate_id("fetch.v2-final_1").is_ok());
        assert!(validate_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn parses_json_list_and_wrapper() {
        let list = r#"[{"id": "a", "type": "echo"}, {"id": "b", "type": "echo", "depends_on": ["a"], "priority": 3}]"#;
        let tasks = parse_tasks(list).unwrap();
        assert_eq!(tasks[1].depends_on, vec!["a"]);
        assert_eq!(tasks[1].priority, 3);

        let wrapped = r#"{"tasks": [{"type": "echo", "prompt": "hi", "timeout": 5}]}"#;
        let tasks = parse_tasks(wrapped).unwrap();
        assert!(tasks[0].id.starts_with("task-"));
        assert_eq!(tasks[0].timeout_secs, Some(5));

        assert!(matches!(parse_tasks("[]"), Err(InputError::NoTasks)));
        assert!(matches!(parse_tasks("[{\"id\": 3}]"), Err(InputError::Json(_))));
    }
}
