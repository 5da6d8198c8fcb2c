//! Session credential and SDP description types.
//!
//! A [`SessionCredential`] authorizes exactly one media negotiation. It is
//! minted by the session broker, handed to the signaling client once, and
//! dropped with the call attempt that acquired it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A short-lived, scoped secret authorizing one realtime negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    secret: String,
    model_id: String,
    expires_at: Option<i64>,
}

impl SessionCredential {
    pub fn new(secret: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            model_id: model_id.into(),
            expires_at: None,
        }
    }

    /// Attaches the broker-reported expiry (seconds since Unix epoch).
    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The bearer secret presented to the signaling endpoint.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The realtime model the credential is scoped to.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("secret", &"[REDACTED]")
            .field("model_id", &self.model_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Which side of the offer/answer handshake a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An opaque SDP blob tagged with its handshake role.
///
/// The payload is never parsed here; transports and the signaling endpoint
/// are the only parties that interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}
