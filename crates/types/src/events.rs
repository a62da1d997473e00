//! Application events.
//!
//! Events are emitted by the application alongside block execution and
//! carried in finalize-block responses. The indexers turn flagged
//! attributes into secondary keys; everything else is pass-through.

use sbor::prelude::*;

/// A single key/value attribute of an event. Only attributes with
/// `index` set are written to the secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    pub index: bool,
}

impl EventAttribute {
    pub fn indexed(key: impl Into<String>, value: impl Into<String>) -> Self {
        EventAttribute {
            key: key.into(),
            value: value.into(),
            index: true,
        }
    }
}

/// A typed application event with attributes.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Event {
    /// Event type, e.g. `"transfer"`. The indexer composite key is
    /// `"<kind>.<attribute key>"`.
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    pub fn new(kind: impl Into<String>, attributes: Vec<EventAttribute>) -> Self {
        Event {
            kind: kind.into(),
            attributes,
        }
    }
}
