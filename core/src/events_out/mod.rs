mod sink;
mod writer;

pub use crate::config::EventsOutConfig;
pub use sink::{event_line, EventsOutSink, EVENT_SCHEMA_VERSION};
pub use writer::{start_events_out, EventsOutTx};
