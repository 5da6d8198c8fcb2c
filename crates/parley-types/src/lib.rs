//! Shared types for the Parley realtime voice platform.
//!
//! This crate holds the plain data types that cross crate boundaries: the
//! call state machine's states, the ephemeral session credential minted by
//! the broker, SDP session descriptions, and inbound auxiliary-channel
//! events. It carries no I/O and no async code.

pub mod event;
pub mod session;

pub use event::InboundEvent;
pub use session::{SdpKind, SessionCredential, SessionDescription};

use serde::{Deserialize, Serialize};

/// States of a single call session as observed by subscribers.
///
/// The manager rests in `Idle`. `Error` is a transient reporting state that
/// is always followed by `Idle` once teardown has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call attempt in flight and no resources held.
    #[default]
    Idle,
    /// Acquiring the credential, local audio and the local offer.
    Preparing,
    /// Exchanging the offer for an answer with the signaling endpoint.
    Negotiating,
    /// Remote answer applied; media and events are flowing.
    Connected,
    /// A stage failed; the error slot holds the reason.
    Error,
    /// Reserved for consumers that track remote hang-up themselves. The
    /// call manager never enters it; a stopped call returns to `Idle`.
    Ended,
}

impl CallState {
    /// Returns the canonical string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Ended => "ended",
        }
    }

    /// Returns `true` while a call attempt owns (or is acquiring) resources.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Preparing | Self::Negotiating | Self::Connected)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
