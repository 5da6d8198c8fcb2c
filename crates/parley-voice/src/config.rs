use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default signaling endpoint for realtime SDP exchange.
pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime";

/// Default label of the auxiliary event data channel.
pub const DEFAULT_EVENT_CHANNEL_LABEL: &str = "oai-events";

/// Default byte budget of the transcript buffer.
pub const DEFAULT_TRANSCRIPT_CAP_BYTES: usize = 8000;

fn default_broker_url() -> String {
    "http://127.0.0.1:3000/api/session".to_string()
}

fn default_signaling_url() -> String {
    DEFAULT_SIGNALING_URL.to_string()
}

fn default_event_channel_label() -> String {
    DEFAULT_EVENT_CHANNEL_LABEL.to_string()
}

fn default_transcript_cap_bytes() -> usize {
    DEFAULT_TRANSCRIPT_CAP_BYTES
}

fn default_request_timeout_secs() -> Option<u64> {
    Some(30)
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: String::new(),
        credential: String::new(),
    }]
}

/// A STUN/TURN server used for NAT traversal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub credential: String,
}

impl fmt::Debug for IceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceServer")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Client-side configuration for a call session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Session broker endpoint that mints ephemeral credentials.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Realtime signaling endpoint; the model is appended as a query parameter.
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    /// Label of the auxiliary event data channel.
    #[serde(default = "default_event_channel_label")]
    pub event_channel_label: String,
    /// Byte budget of the transcript buffer. Default: 8000.
    #[serde(default = "default_transcript_cap_bytes")]
    pub transcript_cap_bytes: usize,
    /// Per-request timeout for broker and signaling calls. `None` defers to
    /// the transport. Default: 30 seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: Option<u64>,
    /// ICE servers handed to the peer transport.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            signaling_url: default_signaling_url(),
            event_channel_label: default_event_channel_label(),
            transcript_cap_bytes: default_transcript_cap_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl CallConfig {
    pub fn new(broker_url: impl Into<String>, signaling_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            signaling_url: signaling_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Builds the shared HTTP client for broker and signaling requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            "parley-voice/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = self.request_timeout() {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}
