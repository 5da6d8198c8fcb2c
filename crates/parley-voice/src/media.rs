//! Media session: peer transport, local capture tracks and the event channel.
//!
//! The transport and capture stack sit behind the [`MediaBackend`] family of
//! traits. [`MediaSession`] owns whatever a call attempt has acquired from
//! the backend and guarantees it is released exactly once, whatever state
//! the attempt reached.

use crate::error::MediaError;
use async_trait::async_trait;
use parley_types::{SdpKind, SessionDescription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A raw message received on the auxiliary event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Inbound remote audio, ready to be attached to an output.
#[derive(Debug)]
pub struct RemoteAudio {
    pub track_id: String,
    pub stream_id: String,
    /// Encoded audio payloads in arrival order.
    pub frames: mpsc::Receiver<Vec<u8>>,
}

/// Invoked once per inbound channel message, in arrival order.
pub type ChannelMessageHandler = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// Invoked when the remote side starts sending audio.
pub type RemoteTrackHandler = Arc<dyn Fn(RemoteAudio) + Send + Sync>;

/// A local capture track (e.g. one microphone channel).
pub trait LocalTrack: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Stops capture and releases the underlying device handle.
    fn stop(&self) -> Result<(), MediaError>;
}

/// The auxiliary, message-oriented channel riding alongside the media.
#[async_trait]
pub trait EventChannel: Send + Sync + 'static {
    fn label(&self) -> &str;

    fn on_message(&self, handler: ChannelMessageHandler);

    async fn close(&self) -> Result<(), MediaError>;
}

/// A peer connection able to run one offer/answer negotiation.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    type Track: LocalTrack;
    type Channel: EventChannel;

    async fn add_track(&self, track: &Self::Track) -> Result<(), MediaError>;

    /// Registers a receive-only audio transceiver.
    async fn add_receive_only_audio(&self) -> Result<(), MediaError>;

    async fn create_event_channel(&self, label: &str) -> Result<Self::Channel, MediaError>;

    fn on_remote_track(&self, handler: RemoteTrackHandler);

    /// Creates the local offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

/// Plays remote audio.
pub trait AudioOutput: Send + Sync + 'static {
    fn play(&self, remote: RemoteAudio);
}

/// Factory for transports, capture tracks and the audio output.
#[async_trait]
pub trait MediaBackend: Send + Sync + 'static {
    type Transport: PeerTransport;

    async fn open_transport(&self) -> Result<Self::Transport, MediaError>;

    /// Opens the local audio capture device.
    async fn capture_audio(
        &self,
    ) -> Result<Vec<<Self::Transport as PeerTransport>::Track>, MediaError>;

    fn audio_output(&self) -> Arc<dyn AudioOutput>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// All media resources owned by one call attempt.
pub struct MediaSession<T: PeerTransport> {
    transport: T,
    tracks: Mutex<Vec<Arc<T::Track>>>,
    channel: Mutex<Option<Arc<T::Channel>>>,
    released: AtomicBool,
}

impl<T: PeerTransport> MediaSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tracks: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn track_count(&self) -> usize {
        lock(&self.tracks).len()
    }

    fn ensure_live(&self) -> Result<(), MediaError> {
        if self.is_released() {
            Err(MediaError::Released)
        } else {
            Ok(())
        }
    }

    /// Captures local audio and attaches every track to the transport.
    ///
    /// Tracks are owned by the session before they are attached, so a
    /// failed attach still leaves them to [`release`](Self::release).
    pub async fn acquire_local_audio<B>(&self, backend: &B) -> Result<(), MediaError>
    where
        B: MediaBackend<Transport = T>,
    {
        self.ensure_live()?;
        let captured: Vec<Arc<T::Track>> = backend
            .capture_audio()
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();

        {
            let mut tracks = lock(&self.tracks);
            if self.is_released() {
                drop(tracks);
                stop_tracks(&captured);
                return Err(MediaError::Released);
            }
            tracks.extend(captured.iter().cloned());
        }

        for track in &captured {
            self.transport.add_track(track).await?;
            debug!(track = track.id(), "attached local audio track");
        }
        Ok(())
    }

    /// Opens the auxiliary event channel.
    pub async fn open_event_channel(&self, label: &str) -> Result<(), MediaError> {
        self.ensure_live()?;
        let channel = Arc::new(self.transport.create_event_channel(label).await?);

        let superseded = {
            let mut slot = lock(&self.channel);
            if self.is_released() {
                true
            } else {
                *slot = Some(Arc::clone(&channel));
                false
            }
        };
        if superseded {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "failed to close late event channel");
            }
            return Err(MediaError::Released);
        }
        Ok(())
    }

    /// Routes inbound channel messages to `handler`.
    pub fn on_channel_message(&self, handler: ChannelMessageHandler) -> Result<(), MediaError> {
        let channel = lock(&self.channel)
            .clone()
            .ok_or_else(|| MediaError::Channel("event channel is not open".to_string()))?;
        channel.on_message(handler);
        Ok(())
    }

    pub fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.transport.on_remote_track(handler);
    }

    /// Registers the receive-only audio transceiver and creates the offer.
    pub async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.ensure_live()?;
        self.transport.add_receive_only_audio().await?;
        let offer = self.transport.create_offer().await?;
        if offer.kind != SdpKind::Offer {
            return Err(MediaError::Description(
                "transport produced a non-offer description".to_string(),
            ));
        }
        Ok(offer)
    }

    pub async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), MediaError> {
        self.ensure_live()?;
        if answer.kind != SdpKind::Answer {
            return Err(MediaError::Description(
                "remote description is not an answer".to_string(),
            ));
        }
        if answer.sdp.trim().is_empty() {
            return Err(MediaError::Description("remote answer is empty".to_string()));
        }
        self.transport.apply_answer(answer).await
    }

    /// Releases every acquired resource. Safe to call repeatedly and from
    /// any partially initialized state; failures are logged, never raised.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let channel = lock(&self.channel).take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(channel = channel.label(), error = %e, "failed to close event channel");
            }
        }

        let tracks = std::mem::take(&mut *lock(&self.tracks));
        stop_tracks(&tracks);

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "failed to close peer transport");
        }
        debug!(tracks = tracks.len(), "media session released");
    }
}

fn stop_tracks<L: LocalTrack>(tracks: &[Arc<L>]) {
    for track in tracks {
        if let Err(e) = track.stop() {
            warn!(track = track.id(), error = %e, "failed to stop local track");
        }
    }
}

impl<T: PeerTransport> std::fmt::Debug for MediaSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("tracks", &self.track_count())
            .field("channel_open", &lock(&self.channel).is_some())
            .field("released", &self.is_released())
            .finish()
    }
}
