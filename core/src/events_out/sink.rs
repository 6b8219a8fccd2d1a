use chrono::Utc;
use serde_json::json;

use crate::executor::traits::{EventSink, ExecutionEvent};

use super::writer::EventsOutTx;

/// Schema version of the JSONL envelope.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// One JSONL line: `{"v":1,"ts":...,"event_type":"task.completed","run_id":...,"data":{...}}`.
pub fn event_line(event: &ExecutionEvent) -> Option<String> {
    let envelope = json!({
        "v": EVENT_SCHEMA_VERSION,
        "ts": Utc::now().to_rfc3339(),
        "event_type": event.event_type(),
        "run_id": event.run_id(),
        "data": event,
    });
    serde_json::to_string(&envelope).ok()
}

/// Forwards engine events to the background JSONL writer.
pub struct EventsOutSink {
    tx: EventsOutTx,
}

impl EventsOutSink {
    pub fn new(tx: EventsOutTx) -> Self {
        Self { tx }
    }
}

impl EventSink for EventsOutSink {
    fn name(&self) -> &str {
        "events_out"
    }

    fn emit(&self, event: &ExecutionEvent) {
        if let Some(line) = event_line(event) {
            self.tx.send_line(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_type_and_payload() {
        let line = event_line(&ExecutionEvent::RunCompleted {
            run_id: "r1".into(),
            success: true,
            cancelled: false,
            duration_ms: 12,
        })
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["event_type"], "run.completed");
        assert_eq!(value["run_id"], "r1");
        assert_eq!(value["data"]["event"], "run_completed");
        assert_eq!(value["data"]["duration_ms"], 12);
    }
}
