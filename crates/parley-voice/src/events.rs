//! Decoding and classification of auxiliary-channel messages.
//!
//! Decode failures on this channel are expected noise and never affect the
//! call. Decoded events whose type tag carries one of the transcript markers
//! are kept; everything else is reported as unclassified and dropped.

use crate::media::ChannelMessage;
use parley_types::InboundEvent;
use thiserror::Error;

/// Substrings of the `type` tag that mark an event as transcript-relevant.
pub const TRANSCRIPT_MARKERS: [&str; 3] = ["transcript", "input", "response"];

/// An inbound message could not be decoded into an [`InboundEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("binary frame on event channel ({0} bytes)")]
    Binary(usize),

    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of classifying one raw channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A decoded event that belongs in the transcript.
    Transcript(InboundEvent),
    /// A decoded event with no transcript marker in its type tag.
    Unclassified(String),
    /// The message was not a JSON object with a string `type` tag.
    Undecodable,
}

/// Decodes a text payload into a tagged event.
pub fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
    Ok(serde_json::from_str(raw)?)
}

/// Returns `true` if the event type contains any transcript marker.
pub fn is_transcript_relevant(kind: &str) -> bool {
    TRANSCRIPT_MARKERS.iter().any(|marker| kind.contains(marker))
}

/// Classifies a raw text message.
pub fn classify(raw: &str) -> Classification {
    match decode(raw) {
        Ok(event) if is_transcript_relevant(&event.kind) => Classification::Transcript(event),
        Ok(event) => Classification::Unclassified(event.kind),
        Err(e) => {
            tracing::debug!(error = %e, "discarding undecodable event");
            Classification::Undecodable
        }
    }
}

/// Classifies a channel message, treating binary frames as undecodable.
pub fn classify_message(message: &ChannelMessage) -> Classification {
    match message {
        ChannelMessage::Text(text) => classify(text),
        ChannelMessage::Binary(bytes) => {
            tracing::debug!(error = %DecodeError::Binary(bytes.len()), "discarding undecodable event");
            Classification::Undecodable
        }
    }
}
