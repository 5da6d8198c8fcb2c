//! The call lifecycle manager.
//!
//! [`CallManager`] drives one call attempt at a time through
//! `Idle → Preparing → Negotiating → Connected`, and back to `Idle` through a
//! single teardown path on stop or on any stage failure.
//!
//! Every attempt gets a generation number. `stop()` bumps the generation,
//! signals cancellation and releases whatever the attempt has acquired so
//! far, without waiting for in-flight requests. Stages that complete for a
//! superseded generation release what they acquired and leave observable
//! state alone.
//!
//! Releases run on detached tasks and are counted while in flight. The
//! manager only reports `Idle` once the release it started has finished, and
//! neither `stop()` nor a new `start()` proceeds while the count is nonzero,
//! so a fresh attempt never overlaps the teardown of the previous one.

use crate::broker::BrokerClient;
use crate::config::CallConfig;
use crate::error::{CallError, MediaError};
use crate::events::{self, Classification};
use crate::media::{ChannelMessageHandler, MediaBackend, MediaSession};
use crate::observe::{CallEvent, DEFAULT_EVENT_BROADCAST_CAPACITY};
use crate::signaling::SignalingClient;
use crate::transcript::TranscriptBuffer;
use parley_types::CallState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

type SessionOf<B> = MediaSession<<B as MediaBackend>::Transport>;

struct Inner<B: MediaBackend> {
    state: CallState,
    last_error: Option<String>,
    generation: u64,
    attempt_id: Option<Uuid>,
    cancel: Option<watch::Sender<bool>>,
    session: Option<Arc<SessionOf<B>>>,
}

struct Shared<B: MediaBackend> {
    broker: BrokerClient,
    signaling: SignalingClient,
    backend: Arc<B>,
    event_channel_label: String,
    inner: Mutex<Inner<B>>,
    /// Number of session releases in flight. Only raised under `inner`.
    pending_releases: watch::Sender<usize>,
    transcript: Arc<Mutex<TranscriptBuffer>>,
    events_tx: broadcast::Sender<CallEvent>,
}

/// Orchestrates credential acquisition, media setup and signaling for a
/// single voice call, and owns cleanup.
///
/// Cloning yields another handle to the same call, so `stop()` can be issued
/// from a different task while `start()` is in flight.
pub struct CallManager<B: MediaBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: MediaBackend> Clone for CallManager<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps a backend failure onto the stage error, treating a release that
/// raced the stage as cancellation.
fn stage_error(error: MediaError, kind: fn(String) -> CallError) -> CallError {
    match error {
        MediaError::Released => CallError::Cancelled,
        other => kind(other.to_string()),
    }
}

/// Abandons the attempt if `start()` is dropped before it settles.
struct AttemptGuard<'a, B: MediaBackend> {
    manager: &'a CallManager<B>,
    generation: u64,
    armed: bool,
}

impl<B: MediaBackend> AttemptGuard<'_, B> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<B: MediaBackend> Drop for AttemptGuard<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.abandon(self.generation);
        }
    }
}

impl<B: MediaBackend> CallManager<B> {
    /// Builds a manager with broker and signaling clients from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &CallConfig, backend: Arc<B>) -> Result<Self, reqwest::Error> {
        let http = config.http_client()?;
        Ok(Self::with_clients(
            config,
            BrokerClient::new(http.clone(), &config.broker_url),
            SignalingClient::new(http, &config.signaling_url),
            backend,
        ))
    }

    pub fn with_clients(
        config: &CallConfig,
        broker: BrokerClient,
        signaling: SignalingClient,
        backend: Arc<B>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(DEFAULT_EVENT_BROADCAST_CAPACITY);
        let (pending_releases, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                broker,
                signaling,
                backend,
                event_channel_label: config.event_channel_label.clone(),
                inner: Mutex::new(Inner {
                    state: CallState::Idle,
                    last_error: None,
                    generation: 0,
                    attempt_id: None,
                    cancel: None,
                    session: None,
                }),
                pending_releases,
                transcript: Arc::new(Mutex::new(TranscriptBuffer::new(
                    config.transcript_cap_bytes,
                ))),
                events_tx,
            }),
        }
    }

    pub fn state(&self) -> CallState {
        lock(&self.shared.inner).state
    }

    /// The reason of the most recent fatal failure, cleared by `start()`.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.inner).last_error.clone()
    }

    /// The transcript text, most recent record last.
    pub fn transcript(&self) -> String {
        lock(&self.shared.transcript).as_str().to_string()
    }

    /// Subscribes to state, error and transcript notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.shared.events_tx.subscribe()
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine.
        let _ = self.shared.events_tx.send(event);
    }

    fn set_state(&self, inner: &mut Inner<B>, state: CallState) {
        if inner.state != state {
            inner.state = state;
            self.emit(CallEvent::StateChanged { state });
        }
    }

    fn releasing(&self) -> bool {
        *self.shared.pending_releases.borrow() > 0
    }

    /// Waits until no session release is in flight.
    async fn releases_settled(&self) {
        let mut rx = self.shared.pending_releases.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Must be called with `inner` locked.
    fn claim_release(&self) {
        self.shared.pending_releases.send_modify(|pending| *pending += 1);
    }

    fn settle_release(&self) {
        self.shared
            .pending_releases
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }

    /// Takes the session out of the shared slot and claims a pending release
    /// for it.
    fn take_session(&self, inner: &mut Inner<B>) -> Option<Arc<SessionOf<B>>> {
        let session = inner.session.take();
        if session.is_some() {
            self.claim_release();
        }
        session
    }

    /// Releases a session claimed through [`take_session`](Self::take_session)
    /// on a detached task, then runs `then` before dropping the claim.
    ///
    /// Dropping the returned handle does not interrupt the release.
    fn spawn_release<F>(&self, session: Arc<SessionOf<B>>, then: F) -> JoinHandle<()>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            session.release().await;
            then(&manager);
            manager.settle_release();
        })
    }

    async fn await_release(handle: JoinHandle<()>) {
        if let Err(e) = handle.await {
            warn!(error = %e, "call teardown task failed");
        }
    }

    /// Starts a call and returns once it is connected.
    ///
    /// Waits for a previous teardown to finish first. Rejects with
    /// [`CallError::AlreadyActive`] while another attempt is preparing,
    /// negotiating or connected. Returns [`CallError::Cancelled`] if `stop()`
    /// interrupts the attempt. Any other error has already been surfaced in
    /// the error slot and the manager is back in `Idle`.
    ///
    /// Dropping the returned future before it resolves abandons the attempt
    /// and releases what it acquired.
    pub async fn start(&self) -> Result<(), CallError> {
        self.releases_settled().await;
        let (generation, mut cancelled) = self.begin_attempt()?;
        let guard = AttemptGuard {
            manager: self,
            generation,
            armed: true,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled.wait_for(|stop| *stop) => Err(CallError::Cancelled),
            result = self.connect(generation) => result,
        };
        guard.disarm();

        match outcome {
            Ok(()) => {
                info!(generation, "call connected");
                Ok(())
            }
            Err(err) if !err.is_fatal() => {
                debug!(generation, error = %err, "call attempt abandoned");
                Err(err)
            }
            Err(err) => {
                self.fail(generation, &err).await;
                Err(err)
            }
        }
    }

    fn begin_attempt(&self) -> Result<(u64, watch::Receiver<bool>), CallError> {
        let mut inner = lock(&self.shared.inner);
        if inner.state.is_active() || self.releasing() {
            warn!(state = inner.state.as_str(), "rejecting start while a call is active");
            return Err(CallError::AlreadyActive);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let attempt_id = Uuid::new_v4();
        inner.generation += 1;
        inner.cancel = Some(cancel_tx);
        inner.attempt_id = Some(attempt_id);
        inner.last_error = None;
        self.set_state(&mut inner, CallState::Preparing);

        info!(%attempt_id, generation = inner.generation, "starting call attempt");
        Ok((inner.generation, cancel_rx))
    }

    async fn connect(&self, generation: u64) -> Result<(), CallError> {
        let shared = &self.shared;

        let credential = shared.broker.acquire().await?;

        let transport = shared
            .backend
            .open_transport()
            .await
            .map_err(|e| stage_error(e, CallError::Negotiation))?;
        let session = Arc::new(MediaSession::new(transport));
        self.install_session(generation, Arc::clone(&session))?;

        let output = shared.backend.audio_output();
        session.on_remote_track(Arc::new(move |remote| {
            debug!(track = %remote.track_id, "remote audio track available");
            output.play(remote);
        }));

        session
            .open_event_channel(&shared.event_channel_label)
            .await
            .map_err(|e| stage_error(e, CallError::Negotiation))?;
        session
            .on_channel_message(self.channel_handler())
            .map_err(|e| stage_error(e, CallError::Negotiation))?;

        session
            .acquire_local_audio(shared.backend.as_ref())
            .await
            .map_err(|e| stage_error(e, CallError::Device))?;
        let offer = session
            .create_offer()
            .await
            .map_err(|e| stage_error(e, CallError::Negotiation))?;
        self.transition(generation, CallState::Negotiating)?;

        let answer = shared.signaling.negotiate(&credential, &offer).await?;
        drop(credential);

        session
            .apply_answer(&answer)
            .await
            .map_err(|e| stage_error(e, CallError::Negotiation))?;
        self.transition(generation, CallState::Connected)
    }

    /// Hands the session to the shared slot so teardown can reach it.
    fn install_session(
        &self,
        generation: u64,
        session: Arc<SessionOf<B>>,
    ) -> Result<(), CallError> {
        let mut inner = lock(&self.shared.inner);
        if inner.generation == generation {
            inner.session = Some(session);
            return Ok(());
        }

        // Superseded while the transport was opening.
        self.claim_release();
        drop(inner);
        drop(self.spawn_release(session, |_| {}));
        Err(CallError::Cancelled)
    }

    fn transition(&self, generation: u64, state: CallState) -> Result<(), CallError> {
        let mut inner = lock(&self.shared.inner);
        if inner.generation != generation {
            return Err(CallError::Cancelled);
        }
        self.set_state(&mut inner, state);
        Ok(())
    }

    fn channel_handler(&self) -> ChannelMessageHandler {
        let transcript = Arc::clone(&self.shared.transcript);
        let events_tx = self.shared.events_tx.clone();
        Arc::new(move |message| {
            if let Classification::Transcript(event) = events::classify_message(&message) {
                let record = event.to_record();
                lock(&transcript).append(&record);
                let _ = events_tx.send(CallEvent::Transcript { record });
            }
        })
    }

    /// Records a fatal error, tears down, then reports `Error` followed by
    /// `Idle`.
    async fn fail(&self, generation: u64, err: &CallError) {
        let reason = err.reason();
        let session = {
            let mut inner = lock(&self.shared.inner);
            if inner.generation != generation {
                return;
            }
            inner.last_error = Some(reason.clone());
            inner.cancel = None;
            self.take_session(&mut inner)
        };

        let detail = err.to_string();
        let report = move |manager: &Self| manager.report_failure(generation, &detail, reason);
        match session {
            Some(session) => Self::await_release(self.spawn_release(session, report)).await,
            None => report(self),
        }
    }

    fn report_failure(&self, generation: u64, detail: &str, reason: String) {
        let mut inner = lock(&self.shared.inner);
        if inner.generation != generation {
            return;
        }
        warn!(
            attempt_id = ?inner.attempt_id,
            state = inner.state.as_str(),
            error = %detail,
            "call attempt failed"
        );
        self.set_state(&mut inner, CallState::Error);
        self.emit(CallEvent::Error { message: reason });
        inner.attempt_id = None;
        self.set_state(&mut inner, CallState::Idle);
    }

    /// Ends the call or abandons the in-flight attempt.
    ///
    /// Never waits for in-flight network requests. Waits for any release
    /// already under way, releases every resource acquired so far and always
    /// resolves to `Idle`. Idempotent.
    pub async fn stop(&self) {
        let (session, cancel) = loop {
            self.releases_settled().await;
            let claimed = {
                let mut inner = lock(&self.shared.inner);
                if self.releasing() {
                    // Another teardown claimed the session in the meantime.
                    None
                } else if inner.state == CallState::Idle && inner.session.is_none() {
                    return;
                } else {
                    inner.generation += 1;
                    Some((self.take_session(&mut inner), inner.cancel.take()))
                }
            };
            if let Some(claimed) = claimed {
                break claimed;
            }
        };

        if let Some(cancel) = cancel {
            // The attempt may already have finished.
            let _ = cancel.send(true);
        }
        match session {
            Some(session) => {
                Self::await_release(self.spawn_release(session, Self::finish_stop)).await
            }
            None => self.finish_stop(),
        }
    }

    fn finish_stop(&self) {
        let mut inner = lock(&self.shared.inner);
        if let Some(attempt_id) = inner.attempt_id.take() {
            info!(%attempt_id, "call stopped");
        }
        self.set_state(&mut inner, CallState::Idle);
    }

    /// Tears down an attempt whose `start()` future was dropped.
    fn abandon(&self, generation: u64) {
        let session = {
            let mut inner = lock(&self.shared.inner);
            if inner.generation != generation {
                return;
            }
            inner.generation += 1;
            inner.cancel = None;
            if let Some(attempt_id) = inner.attempt_id {
                warn!(%attempt_id, "call attempt dropped before it settled");
            }
            let session = self.take_session(&mut inner);
            if session.is_none() {
                inner.attempt_id = None;
                self.set_state(&mut inner, CallState::Idle);
            }
            session
        };

        if let Some(session) = session {
            if tokio::runtime::Handle::try_current().is_ok() {
                drop(self.spawn_release(session, Self::finish_stop));
            } else {
                warn!("no runtime to release an abandoned call; media left to the backend");
                self.settle_release();
                self.finish_stop();
            }
        }
    }
}

impl<B: MediaBackend> std::fmt::Debug for CallManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("CallManager")
            .field("state", &inner.state)
            .field("last_error", &inner.last_error)
            .field("generation", &inner.generation)
            .field("broker_url", &self.shared.broker.url())
            .field("signaling_url", &self.shared.signaling.url())
            .finish()
    }
}
