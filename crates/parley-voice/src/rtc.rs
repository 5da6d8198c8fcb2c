//! Media backend on the `webrtc` crate.
//!
//! Device I/O stays with the embedding application: an [`AudioCapture`]
//! feeds encoded Opus samples into the local track, and an
//! [`AudioOutput`](crate::media::AudioOutput) consumes the remote RTP
//! payloads.

use crate::config::IceServer;
use crate::error::MediaError;
use crate::media::{
    AudioOutput, ChannelMessage, ChannelMessageHandler, EventChannel, LocalTrack, MediaBackend,
    PeerTransport, RemoteAudio, RemoteTrackHandler,
};
use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use ::webrtc::api::{APIBuilder, API};
use ::webrtc::data_channel::data_channel_message::DataChannelMessage;
use ::webrtc::data_channel::RTCDataChannel;
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use ::webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use ::webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_local::TrackLocal;
use async_trait::async_trait;
use parley_types::SessionDescription;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Buffered remote audio payloads per inbound track.
const REMOTE_FRAME_BUFFER: usize = 64;

const LOCAL_STREAM_ID: &str = "parley-local";

fn transport_error(e: ::webrtc::Error) -> MediaError {
    MediaError::Transport(e.to_string())
}

/// Stops a running capture feed.
pub type CaptureStop = Box<dyn FnOnce() + Send>;

/// Source of encoded local audio.
pub trait AudioCapture: Send + Sync + 'static {
    /// Begins writing Opus samples into `track`. The returned callback
    /// stops the feed and releases the device.
    fn start(&self, track: Arc<TrackLocalStaticSample>) -> Result<CaptureStop, MediaError>;
}

/// A local Opus track fed by an [`AudioCapture`].
pub struct SampleTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    stop: Mutex<Option<CaptureStop>>,
}

impl LocalTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) -> Result<(), MediaError> {
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            stop();
        }
        Ok(())
    }
}

/// The auxiliary data channel.
pub struct DataChannel {
    label: String,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl EventChannel for DataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn on_message(&self, handler: ChannelMessageHandler) {
        self.channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let message = if msg.is_string {
                        match String::from_utf8(msg.data.to_vec()) {
                            Ok(text) => ChannelMessage::Text(text),
                            Err(e) => ChannelMessage::Binary(e.into_bytes()),
                        }
                    } else {
                        ChannelMessage::Binary(msg.data.to_vec())
                    };
                    handler(message);
                })
            }));
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.channel
            .close()
            .await
            .map_err(|e| MediaError::Channel(e.to_string()))
    }
}

/// A `webrtc` peer connection.
pub struct RtcTransport {
    peer: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    type Track = SampleTrack;
    type Channel = DataChannel;

    async fn add_track(&self, track: &SampleTrack) -> Result<(), MediaError> {
        self.peer
            .add_track(Arc::clone(&track.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn add_receive_only_audio(&self) -> Result<(), MediaError> {
        self.peer
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn create_event_channel(&self, label: &str) -> Result<DataChannel, MediaError> {
        let channel = self
            .peer
            .create_data_channel(label, None)
            .await
            .map_err(|e| MediaError::Channel(e.to_string()))?;
        Ok(DataChannel {
            label: label.to_string(),
            channel,
        })
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.peer.on_track(Box::new(move |track, _, _| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                let (tx, rx) = mpsc::channel(REMOTE_FRAME_BUFFER);
                handler(RemoteAudio {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    frames: rx,
                });
                tokio::spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        if tx.send(packet.payload.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    debug!("remote audio track ended");
                });
            })
        }));
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(transport_error)?;

        // Non-trickle: the offer must carry every gathered candidate.
        let mut gathered = self.peer.gathering_complete_promise().await;
        self.peer
            .set_local_description(offer)
            .await
            .map_err(transport_error)?;
        let _ = gathered.recv().await;

        let local = self
            .peer
            .local_description()
            .await
            .ok_or_else(|| MediaError::Description("local description missing".to_string()))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), MediaError> {
        let answer = RTCSessionDescription::answer(answer.sdp.clone())
            .map_err(|e| MediaError::Description(e.to_string()))?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| MediaError::Description(e.to_string()))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.peer.close().await.map_err(transport_error)
    }
}

/// Media backend producing `webrtc` peer connections.
pub struct RtcBackend {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    capture: Arc<dyn AudioCapture>,
    output: Arc<dyn AudioOutput>,
}

impl RtcBackend {
    pub fn new(
        ice_servers: &[IceServer],
        capture: Arc<dyn AudioCapture>,
        output: Arc<dyn AudioOutput>,
    ) -> Result<Self, MediaError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(transport_error)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media).map_err(transport_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        Ok(Self {
            api,
            ice_servers,
            capture,
            output,
        })
    }
}

#[async_trait]
impl MediaBackend for RtcBackend {
    type Transport = RtcTransport;

    async fn open_transport(&self) -> Result<RtcTransport, MediaError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let peer = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(transport_error)?;
        Ok(RtcTransport {
            peer: Arc::new(peer),
        })
    }

    async fn capture_audio(&self) -> Result<Vec<SampleTrack>, MediaError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        let stop = self
            .capture
            .start(Arc::clone(&track))
            .map_err(|e| match e {
                MediaError::Device(_) => e,
                other => MediaError::Device(other.to_string()),
            })?;
        Ok(vec![SampleTrack {
            id: track.id().to_owned(),
            track,
            stop: Mutex::new(Some(stop)),
        }])
    }

    fn audio_output(&self) -> Arc<dyn AudioOutput> {
        Arc::clone(&self.output)
    }
}
