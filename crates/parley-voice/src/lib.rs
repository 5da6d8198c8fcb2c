//! Realtime voice call sessions for the Parley platform.
//!
//! A call connects the local client to a remote AI voice agent over a
//! peer-to-peer media channel plus an auxiliary event channel. Setting one up
//! takes three external parties: the session broker (mints a short-lived
//! credential), the signaling endpoint (trades the local SDP offer for an
//! answer), and a media backend (capture, transport, playback).
//!
//! [`CallManager`] sequences those parties as a single state machine and owns
//! cleanup: every exit path, whether connected-then-stopped, stopped
//! mid-negotiation, or failed at any stage, goes through the same teardown
//! and ends in [`CallState::Idle`] with nothing left acquired.
//!
//! The media stack is pluggable through [`MediaBackend`]. Enabling the
//! `webrtc` feature adds a backend built on the `webrtc` crate.

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod media;
pub mod observe;
pub mod signaling;
pub mod transcript;
#[cfg(feature = "webrtc")]
pub mod rtc;

pub use broker::BrokerClient;
pub use config::{CallConfig, IceServer, DEFAULT_EVENT_CHANNEL_LABEL, DEFAULT_SIGNALING_URL};
pub use error::{CallError, MediaError};
pub use events::{classify, Classification, DecodeError, TRANSCRIPT_MARKERS};
pub use lifecycle::CallManager;
pub use media::{
    AudioOutput, ChannelMessage, ChannelMessageHandler, EventChannel, LocalTrack, MediaBackend,
    MediaSession, PeerTransport, RemoteAudio, RemoteTrackHandler,
};
pub use observe::{spawn_log_observer, CallEvent};
pub use parley_types::{CallState, InboundEvent, SessionCredential, SessionDescription};
pub use signaling::SignalingClient;
pub use transcript::TranscriptBuffer;
