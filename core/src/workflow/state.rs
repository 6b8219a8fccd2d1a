use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Partial state update: keys to overwrite.
pub type StateUpdate = BTreeMap<String, Value>;

/// Shared key/value state threaded through a run.
///
/// Batch mode stores each successful task result under the task id. Graph
/// mode lets handlers return updates that are merged after the handler
/// returns; nothing writes to a state concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    values: BTreeMap<String, Value>,

    /// Node (or task) ids in the order they were entered.
    #[serde(default)]
    history: Vec<String>,

    #[serde(default)]
    loop_counters: BTreeMap<String, u32>,

    metadata: StateMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// What a node handler hands back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    Unchanged,
    /// Overwrite the listed keys, keep everything else.
    Update(StateUpdate),
    /// Replace the whole state.
    Replace(WorkflowState),
}

impl HandlerOutput {
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut update = StateUpdate::new();
        update.insert(key.into(), value.into());
        Self::Update(update)
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            history: Vec::new(),
            loop_counters: BTreeMap::new(),
            metadata: StateMetadata {
                started_at: Utc::now(),
                elapsed_ms: 0,
            },
        }
    }

    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut state = Self::new();
        for (key, value) in values {
            state.values.insert(key.into(), value);
        }
        state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed read. `None` when the key is missing or does not deserialize as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn record_visit(&mut self, id: &str) {
        self.history.push(id.to_string());
    }

    pub fn loop_count(&self, node_id: &str) -> u32 {
        self.loop_counters.get(node_id).copied().unwrap_or(0)
    }

    /// Count one more entry into a loop node and return the new count.
    pub fn enter_loop(&mut self, node_id: &str) -> u32 {
        let count = self.loop_counters.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// Refresh `elapsed_ms` from `started_at`.
    pub fn touch(&mut self) {
        let elapsed = Utc::now() - self.metadata.started_at;
        self.metadata.elapsed_ms = elapsed.num_milliseconds().max(0) as u64;
    }

    pub fn apply(&mut self, output: HandlerOutput) {
        match output {
            HandlerOutput::Unchanged => {}
            HandlerOutput::Update(update) => self.values.extend(update),
            HandlerOutput::Replace(state) => *self = state,
        }
    }

    /// Fold a branch's changes (relative to the `base` it was forked from)
    /// into this state.
    ///
    /// Only keys the branch actually changed are written, so merging
    /// branches one after another in submission order gives
    /// last-writer-wins per key. History entries the branch appended are
    /// appended here in the same order.
    pub fn merge_branch(&mut self, base: &WorkflowState, branch: &WorkflowState) {
        for (key, value) in &branch.values {
            if base.values.get(key) != Some(value) {
                self.values.insert(key.clone(), value.clone());
            }
        }
        for key in base.values.keys() {
            if !branch.values.contains_key(key) {
                self.values.remove(key);
            }
        }

        let shared = if branch.history.starts_with(&base.history) {
            base.history.len()
        } else {
            0
        };
        self.history.extend(branch.history[shared..].iter().cloned());

        for (node, count) in &branch.loop_counters {
            if base.loop_counters.get(node) != Some(count) {
                self.loop_counters.insert(node.clone(), *count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn apply_update_and_replace() {
        let mut state = WorkflowState::from_values([("a", json!(1))]);
        state.apply(HandlerOutput::set("b", 2));
        assert_eq!(state.get("a"), Some(&json!(1)));
        assert_eq!(state.get_as::<i64>("b"), Some(2));

        state.apply(HandlerOutput::Replace(WorkflowState::from_values([("c", json!("x"))])));
        assert!(!state.contains_key("a"));
        assert_eq!(state.get_as::<String>("c"), Some("x".to_string()));
    }

    #[test]
    fn merge_is_last_writer_wins_in_merge_order() {
        let mut base = WorkflowState::from_values([("shared", json!(0)), ("keep", json!(true))]);
        base.record_visit("split");

        let mut left = base.clone();
        left.set("shared", 1);
        left.set("left_only", "l");
        left.record_visit("left");

        let mut right = base.clone();
        right.set("shared", 2);
        right.record_visit("right");

        let mut merged = base.clone();
        merged.merge_branch(&base, &left);
        merged.merge_branch(&base, &right);

        assert_eq!(merged.get("shared"), Some(&json!(2)));
        assert_eq!(merged.get("left_only"), Some(&json!("l")));
        assert_eq!(merged.get("keep"), Some(&json!(true)));
        assert_eq!(merged.history(), &["split", "left", "right"]);
    }

    #[test]
    fn untouched_keys_do_not_clobber_earlier_branches() {
        let base = WorkflowState::from_values([("k", json!("base"))]);
        let mut writer = base.clone();
        writer.set("k", "writer");
        let idle = base.clone();

        let mut merged = base.clone();
        merged.merge_branch(&base, &writer);
        merged.merge_branch(&base, &idle);
        assert_eq!(merged.get("k"), Some(&json!("writer")));
    }

    #[test]
    fn loop_counters_increment() {
        let mut state = WorkflowState::new();
        assert_eq!(state.loop_count("l"), 0);
        assert_eq!(state.enter_loop("l"), 1);
        assert_eq!(state.enter_loop("l"), 2);
        assert_eq!(state.loop_count("l"), 2);
    }

    #[test]
    fn serde_round_trip_keeps_everything() {
        let mut state = WorkflowState::from_values([("n", json!(3))]);
        state.record_visit("start");
        state.enter_loop("loop");
        state.touch();

        let text = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }
}
