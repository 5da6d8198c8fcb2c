//! Inbound auxiliary-channel events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded message from the auxiliary event channel.
///
/// Only the `type` tag is interpreted; every other field is carried through
/// untouched so the serialized form stays inspectable downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// The event type tag, e.g. `response.audio_transcript.delta`.
    #[serde(rename = "type")]
    pub kind: String,
    /// All remaining top-level fields of the message.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl InboundEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Serializes the full event (tag and payload) back to compact JSON.
    pub fn to_record(&self) -> String {
        // A String-keyed map of JSON values cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}
