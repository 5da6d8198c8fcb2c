//! Change notifications emitted by the call manager.
//!
//! Subscribers (a UI, a logger, metrics) each hold a broadcast receiver. A
//! subscriber that falls behind loses the oldest notifications; it never
//! blocks the manager.

use parley_types::CallState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default capacity of the call event broadcast channel.
pub const DEFAULT_EVENT_BROADCAST_CAPACITY: usize = 256;

/// A single observable change on a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// The call state machine moved to `state`.
    StateChanged { state: CallState },
    /// A fatal error was recorded in the error slot.
    Error { message: String },
    /// A transcript-relevant event was appended to the transcript.
    Transcript { record: String },
}

/// Spawns an observer that writes every call event to the log.
///
/// The task ends when the manager (and every sender clone) is dropped.
pub fn spawn_log_observer(mut rx: broadcast::Receiver<CallEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(CallEvent::StateChanged { state }) => {
                    tracing::info!(state = state.as_str(), "call state changed");
                }
                Ok(CallEvent::Error { message }) => {
                    tracing::warn!(%message, "call failed");
                }
                Ok(CallEvent::Transcript { record }) => {
                    tracing::debug!(bytes = record.len(), "transcript event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "call event observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
