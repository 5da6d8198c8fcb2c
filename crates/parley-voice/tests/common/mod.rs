//! Shared fixtures: an in-memory media backend that keeps a resource ledger,
//! and mock broker/signaling servers on ephemeral ports.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_voice::{
    AudioOutput, CallConfig, CallEvent, CallState, ChannelMessage, ChannelMessageHandler,
    EventChannel, LocalTrack, MediaBackend, MediaError, PeerTransport, RemoteAudio,
    RemoteTrackHandler, SessionDescription,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const TEST_SECRET: &str = "ek_test_secret";
pub const TEST_MODEL: &str = "gpt-4o-realtime-test";
pub const TEST_ANSWER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=answer\r\n";

// ── Media ledger ────────────────────────────────────────────────────

/// Counts every resource the fake backend hands out and takes back.
#[derive(Debug, Default)]
pub struct Ledger {
    pub transports_opened: AtomicUsize,
    pub transports_closed: AtomicUsize,
    pub tracks_started: AtomicUsize,
    pub tracks_stopped: AtomicUsize,
    pub tracks_attached: AtomicUsize,
    pub channels_opened: AtomicUsize,
    pub channels_closed: AtomicUsize,
    /// Channel closes begun, including ones still waiting out a delay.
    pub channels_closing: AtomicUsize,
    pub receive_only_added: AtomicUsize,
    pub remote_played: AtomicUsize,
}

impl Ledger {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Panics unless every acquired resource has been released.
    pub fn assert_all_released(&self) {
        assert_eq!(
            Self::get(&self.transports_opened),
            Self::get(&self.transports_closed),
            "leaked transport: {:?}",
            self
        );
        assert_eq!(
            Self::get(&self.tracks_started),
            Self::get(&self.tracks_stopped),
            "leaked capture track: {:?}",
            self
        );
        assert_eq!(
            Self::get(&self.channels_opened),
            Self::get(&self.channels_closed),
            "leaked event channel: {:?}",
            self
        );
    }
}

pub struct FakeTrack {
    id: String,
    ledger: Arc<Ledger>,
    stopped: AtomicBool,
}

impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) -> Result<(), MediaError> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.ledger.tracks_stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeChannel {
    label: String,
    ledger: Arc<Ledger>,
    handler: Arc<Mutex<Option<ChannelMessageHandler>>>,
    fail_close: bool,
    close_delay: Option<Duration>,
}

#[async_trait]
impl EventChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn on_message(&self, handler: ChannelMessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.ledger.channels_closing.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.ledger.channels_closed.fetch_add(1, Ordering::SeqCst);
        self.handler.lock().unwrap().take();
        if self.fail_close {
            Err(MediaError::Channel("close failed".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct FakeTransport {
    ledger: Arc<Ledger>,
    behavior: Behavior,
    channel_handler: Arc<Mutex<Option<ChannelMessageHandler>>>,
    remote_handler: Arc<Mutex<Option<RemoteTrackHandler>>>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerTransport for FakeTransport {
    type Track = FakeTrack;
    type Channel = FakeChannel;

    async fn add_track(&self, _track: &FakeTrack) -> Result<(), MediaError> {
        self.ledger.tracks_attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_receive_only_audio(&self) -> Result<(), MediaError> {
        self.ledger.receive_only_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_event_channel(&self, label: &str) -> Result<FakeChannel, MediaError> {
        self.ledger.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel {
            label: label.to_string(),
            ledger: Arc::clone(&self.ledger),
            handler: Arc::clone(&self.channel_handler),
            fail_close: self.behavior.fail_channel_close,
            close_delay: self.behavior.channel_close_delay,
        })
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.remote_handler.lock().unwrap() = Some(handler);
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::offer("v=0\r\ns=offer\r\n"))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), MediaError> {
        if self.behavior.reject_answer {
            return Err(MediaError::Description(format!(
                "cannot apply {} byte answer",
                answer.sdp.len()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ledger.transports_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct CountingOutput {
    ledger: Arc<Ledger>,
}

impl AudioOutput for CountingOutput {
    fn play(&self, _remote: RemoteAudio) {
        self.ledger.remote_played.fetch_add(1, Ordering::SeqCst);
    }
}

/// Knobs for injecting failures and latency into the fake backend.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub deny_capture: bool,
    pub reject_answer: bool,
    pub fail_channel_close: bool,
    pub tracks: usize,
    pub open_delay: Option<Duration>,
    pub capture_delay: Option<Duration>,
    pub channel_close_delay: Option<Duration>,
}

pub struct FakeBackend {
    pub ledger: Arc<Ledger>,
    behavior: Behavior,
    channel_handler: Arc<Mutex<Option<ChannelMessageHandler>>>,
    remote_handler: Arc<Mutex<Option<RemoteTrackHandler>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_behavior(Behavior {
            tracks: 1,
            ..Behavior::default()
        })
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            ledger: Arc::new(Ledger::default()),
            behavior,
            channel_handler: Arc::new(Mutex::new(None)),
            remote_handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Delivers a message as if it arrived on the event channel.
    /// Returns `false` if no handler is registered.
    pub fn deliver(&self, message: ChannelMessage) -> bool {
        let handler = self.channel_handler.lock().unwrap().clone();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }

    pub fn deliver_text(&self, text: &str) -> bool {
        self.deliver(ChannelMessage::Text(text.to_string()))
    }

    /// Simulates the remote side starting its audio track.
    pub fn emit_remote_track(&self) -> bool {
        let handler = self.remote_handler.lock().unwrap().clone();
        match handler {
            Some(handler) => {
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
                handler(RemoteAudio {
                    track_id: "remote-audio".to_string(),
                    stream_id: "remote-stream".to_string(),
                    frames: rx,
                });
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    type Transport = FakeTransport;

    async fn open_transport(&self) -> Result<FakeTransport, MediaError> {
        if let Some(delay) = self.behavior.open_delay {
            tokio::time::sleep(delay).await;
        }
        self.ledger.transports_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTransport {
            ledger: Arc::clone(&self.ledger),
            behavior: self.behavior.clone(),
            channel_handler: Arc::clone(&self.channel_handler),
            remote_handler: Arc::clone(&self.remote_handler),
            closed: AtomicBool::new(false),
        })
    }

    async fn capture_audio(&self) -> Result<Vec<FakeTrack>, MediaError> {
        if let Some(delay) = self.behavior.capture_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.deny_capture {
            return Err(MediaError::Device("Permission denied".to_string()));
        }
        let tracks = (0..self.behavior.tracks)
            .map(|i| {
                self.ledger.tracks_started.fetch_add(1, Ordering::SeqCst);
                FakeTrack {
                    id: format!("mic-{}", i),
                    ledger: Arc::clone(&self.ledger),
                    stopped: AtomicBool::new(false),
                }
            })
            .collect();
        Ok(tracks)
    }

    fn audio_output(&self) -> Arc<dyn AudioOutput> {
        Arc::new(CountingOutput {
            ledger: Arc::clone(&self.ledger),
        })
    }
}

// ── Mock HTTP collaborators ─────────────────────────────────────────

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A broker that always mints a valid credential.
pub fn broker_ok() -> Router {
    Router::new().route(
        "/api/session",
        get(|| async {
            Json(json!({
                "client_secret": { "value": TEST_SECRET, "expires_at": 1_900_000_000 },
                "model": TEST_MODEL,
            }))
        }),
    )
}

/// A broker that answers with `status` and a plain-text `body`.
pub fn broker_status(status: StatusCode, body: &'static str) -> Router {
    Router::new().route("/api/session", get(move || async move { (status, body) }))
}

/// A broker that stalls long enough for a test to interrupt it.
pub fn broker_stalled() -> Router {
    Router::new().route(
        "/api/session",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::GATEWAY_TIMEOUT
        }),
    )
}

/// A signaling endpoint that checks auth and model before answering.
pub fn signaling_ok() -> Router {
    Router::new().route(
        "/v1/realtime",
        post(
            |Query(params): Query<HashMap<String, String>>, headers: HeaderMap, body: String| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if auth != format!("Bearer {}", TEST_SECRET) {
                    return (StatusCode::UNAUTHORIZED, "bad token".to_string());
                }
                if params.get("model").map(String::as_str) != Some(TEST_MODEL) {
                    return (StatusCode::BAD_REQUEST, "wrong model".to_string());
                }
                if !body.starts_with("v=0") {
                    return (StatusCode::BAD_REQUEST, "not an sdp offer".to_string());
                }
                (StatusCode::CREATED, TEST_ANSWER.to_string())
            },
        ),
    )
}

pub fn signaling_status(status: StatusCode, body: &'static str) -> Router {
    Router::new().route("/v1/realtime", post(move || async move { (status, body) }))
}

pub fn signaling_stalled() -> Router {
    Router::new().route(
        "/v1/realtime",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            (StatusCode::CREATED, TEST_ANSWER)
        }),
    )
}

/// Serves both collaborators and returns a config pointing at them.
pub async fn config_for(broker: Router, signaling: Router) -> CallConfig {
    let broker_url = serve(broker).await;
    let signaling_url = serve(signaling).await;
    CallConfig::new(
        format!("{}/api/session", broker_url),
        format!("{}/v1/realtime", signaling_url),
    )
}

// ── Event helpers ───────────────────────────────────────────────────

/// Drains the receiver until `state` is announced, failing after 5 s.
pub async fn wait_for_state(rx: &mut broadcast::Receiver<CallEvent>, state: CallState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(CallEvent::StateChanged { state: s }) if s == state => return,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended before {:?}: {}", state, e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state));
}

/// Polls `condition` until it holds, failing after 5 s.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

/// Collects the state transitions currently buffered in the receiver.
pub fn drain_states(rx: &mut broadcast::Receiver<CallEvent>) -> Vec<CallState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CallEvent::StateChanged { state } = event {
            states.push(state);
        }
    }
    states
}
