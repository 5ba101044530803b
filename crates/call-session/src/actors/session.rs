//! `CallSessionActor` - one actor per call, owner of the `CallSession`.
//!
//! The session actor is the call lifecycle controller:
//!
//! - Owns the local media controller, the negotiation engine (and with it the
//!   peer connection) and the signal subscription for its `call_id`
//! - Serializes everything that touches the session: handle requests, inbound
//!   signals, peer connection events, the ring timer and offer re-sends are
//!   all branches of one `select!` loop
//! - Guarantees teardown (media release, connection close, unsubscribe) on
//!   every path into `Ended` or `Failed`
//!
//! # State machine
//!
//! ```text
//! Idle ─start─▶ AwaitingMedia ─tracks attached─▶ Ringing ─offer─▶ Negotiating ─remote track─▶ Connected
//!                    │                              │                  │                          │
//!                    └──────── Failed ◀─────────────┴── ring timeout ──┘                 hangup / EndCall
//!                                                                                               ▼
//!                                                                                    Ending ─▶ Ended
//! ```
//!
//! A Caller enters `Negotiating` immediately after `Ringing` by sending its
//! offer; a Receiver stays `Ringing` until the remote offer arrives. The ring
//! timer stays armed until remote media is observed.

use super::messages::{
    CallEvent, CallInfo, CallRole, CallState, EndedBy, SessionMessage, SessionSnapshot,
    StateChange,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::config::Config;
use crate::errors::CallError;
use crate::media::{LocalMediaController, MediaCapture, MediaConstraints, MediaTracks, TrackInfo};
use crate::negotiation::{
    CandidateDisposition, NegotiationEngine, PeerConnectionFactory, PeerEvent,
};
use crate::observability::metrics;
use crate::profile::ProfileDirectory;
use crate::signal::{IceCandidate, SessionDescription, Signal, SignalPayload};
use crate::transport::{SignalSubscription, SignalTransport};

use chrono::Utc;
use common::types::{CallId, PartyId};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Capacity of the per-session event broadcast.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// External collaborators shared by every session.
#[derive(Clone)]
pub struct CallDependencies {
    pub capture: Arc<dyn MediaCapture>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub transport: Arc<dyn SignalTransport>,
    pub profiles: Option<Arc<dyn ProfileDirectory>>,
}

impl CallDependencies {
    #[must_use]
    pub fn new(
        capture: Arc<dyn MediaCapture>,
        peers: Arc<dyn PeerConnectionFactory>,
        transport: Arc<dyn SignalTransport>,
    ) -> Self {
        Self {
            capture,
            peers,
            transport,
            profiles: None,
        }
    }

    #[must_use]
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileDirectory>) -> Self {
        self.profiles = Some(profiles);
        self
    }
}

/// Per-call parameters fixed at creation.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub call_id: CallId,
    pub local_party_id: PartyId,
    pub remote_party_id: PartyId,
    pub role: CallRole,
    pub ring_timeout: Duration,
    pub offer_resend_interval: Duration,
    pub media_constraints: MediaConstraints,
}

impl SessionParams {
    #[must_use]
    pub fn new(
        call_id: CallId,
        local_party_id: PartyId,
        remote_party_id: PartyId,
        role: CallRole,
        config: &Config,
    ) -> Self {
        Self {
            call_id,
            local_party_id,
            remote_party_id,
            role,
            ring_timeout: config.ring_timeout(),
            offer_resend_interval: config.offer_resend_interval(),
            media_constraints: config.media_constraints(),
        }
    }
}

/// Handle to a `CallSessionActor`.
///
/// Cheap to clone. `state()`, `duration()` and `failure()` read the latest
/// published snapshot and keep working after the actor has stopped.
#[derive(Clone, Debug)]
pub struct CallSessionHandle {
    call_id: CallId,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<CallEvent>,
    mailbox: Arc<MailboxMonitor>,
}

impl CallSessionHandle {
    /// Start the call: acquire media, subscribe, ring, and (as Caller) offer.
    ///
    /// # Errors
    ///
    /// `InvalidState` if already started; `MediaAcquisitionDenied`,
    /// `TransportUnavailable` or `NegotiationFailed` if setup fails (the
    /// session is then `Failed`).
    pub async fn start(&self) -> Result<(), CallError> {
        self.request(|respond_to| SessionMessage::Start { respond_to })
            .await?
    }

    /// Hang up. No-op if the call already ended.
    pub async fn hangup(&self) {
        if let Err(e) = self
            .request(|respond_to| SessionMessage::Hangup { respond_to })
            .await
        {
            debug!(
                target: "call.actor.session",
                call_id = %self.call_id,
                error = %e,
                "Hangup on stopped session ignored"
            );
        }
    }

    /// Flip audio enablement; returns the new state.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the call has ended or holds no audio track.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|respond_to| SessionMessage::ToggleMute { respond_to })
            .await?
    }

    /// Flip video enablement; returns the new state.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the call has ended or holds no video track.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        self.request(|respond_to| SessionMessage::ToggleVideo { respond_to })
            .await?
    }

    /// Deliver a signal received outside the session's own subscription.
    ///
    /// # Errors
    ///
    /// `Internal` if the session actor has stopped.
    pub async fn on_remote_signal(&self, signal: Signal) -> Result<(), CallError> {
        self.mailbox.record_enqueue();
        if let Err(e) = self
            .sender
            .send(SessionMessage::RemoteSignal { signal })
            .await
        {
            self.mailbox.record_drop();
            return Err(CallError::Internal(format!("channel send failed: {e}")));
        }
        Ok(())
    }

    /// Diagnostic snapshot from the actor.
    ///
    /// # Errors
    ///
    /// `Internal` if the session actor has stopped.
    pub async fn info(&self) -> Result<CallInfo, CallError> {
        self.request(|respond_to| SessionMessage::GetInfo { respond_to })
            .await
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    /// `now - connected_at` while connected, frozen once ended, else zero.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.snapshot.borrow().duration_at(Instant::now())
    }

    #[must_use]
    pub fn failure(&self) -> Option<CallError> {
        self.snapshot.borrow().failure.clone()
    }

    /// Subscribe to call events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Watch state snapshots.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    #[must_use]
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Cancel the actor. A live call is hung up first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message(tx)).await {
            self.mailbox.record_drop();
            return Err(CallError::Internal(format!("channel send failed: {e}")));
        }
        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `CallSessionActor` implementation.
pub struct CallSessionActor {
    call_id: CallId,
    local_party_id: PartyId,
    remote_party_id: PartyId,
    role: CallRole,
    state: CallState,
    ring_timeout: Duration,
    offer_resend_interval: Duration,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    media: LocalMediaController,
    peers: Arc<dyn PeerConnectionFactory>,
    transport: Arc<dyn SignalTransport>,
    /// Present from connection setup until teardown.
    engine: Option<NegotiationEngine>,
    peer_events: Option<mpsc::Receiver<PeerEvent>>,
    subscription: Option<SignalSubscription>,
    /// Dropped to cancel; can never fire afterwards.
    ring_timer: Option<Pin<Box<Sleep>>>,
    offer_resend: Option<Interval>,
    /// Local candidates gathered so far, re-sent with the offer.
    local_candidates: Vec<IceCandidate>,
    /// Received, not owned; dropped on teardown.
    remote_tracks: Vec<TrackInfo>,
    started_at: Option<Instant>,
    connected_at: Option<Instant>,
    ended_at: Option<Instant>,
    failure: Option<CallError>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<CallEvent>,
    history: Vec<StateChange>,
    created_at: chrono::DateTime<Utc>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl CallSessionActor {
    /// Spawn a session actor in `Idle` and return its handle and task.
    #[must_use]
    pub fn spawn(
        params: SessionParams,
        deps: CallDependencies,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (CallSessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (snapshot, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Session,
            params.call_id.as_str(),
        ));

        let actor = Self {
            call_id: params.call_id.clone(),
            local_party_id: params.local_party_id,
            remote_party_id: params.remote_party_id,
            role: params.role,
            state: CallState::Idle,
            ring_timeout: params.ring_timeout,
            offer_resend_interval: params.offer_resend_interval,
            receiver,
            cancel_token: cancel_token.clone(),
            media: LocalMediaController::new(deps.capture, params.media_constraints),
            peers: deps.peers,
            transport: deps.transport,
            engine: None,
            peer_events: None,
            subscription: None,
            ring_timer: None,
            offer_resend: None,
            local_candidates: Vec::new(),
            remote_tracks: Vec::new(),
            started_at: None,
            connected_at: None,
            ended_at: None,
            failure: None,
            snapshot,
            events: events.clone(),
            history: vec![StateChange {
                state: CallState::Idle,
                at: Utc::now(),
            }],
            created_at: Utc::now(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallSessionHandle {
            call_id: params.call_id,
            sender,
            cancel_token,
            snapshot: snapshot_rx,
            events,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "call.actor.session", fields(call_id = %self.call_id))]
    async fn run(mut self) {
        info!(
            target: "call.actor.session",
            call_id = %self.call_id,
            role = self.role.as_str(),
            "CallSessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "call.actor.session",
                        call_id = %self.call_id,
                        "CallSessionActor received cancellation signal"
                    );
                    self.hangup().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.handle_message(message).await;
                        self.mailbox.record_dequeue();
                        self.metrics.record_message_processed();
                    } else {
                        debug!(
                            target: "call.actor.session",
                            call_id = %self.call_id,
                            "All handles dropped, exiting"
                        );
                        self.hangup().await;
                        break;
                    }
                }

                signal = next_signal(&mut self.subscription) => {
                    if let Some(signal) = signal {
                        self.handle_remote_signal(signal).await;
                    } else {
                        self.subscription = None;
                        self.fail(CallError::TransportUnavailable(
                            "signal subscription closed".to_string(),
                        ))
                        .await;
                    }
                }

                event = next_peer_event(&mut self.peer_events) => {
                    if let Some(event) = event {
                        self.handle_peer_event(event).await;
                    } else {
                        self.peer_events = None;
                        self.fail(CallError::ConnectionFailed(
                            "peer connection event stream closed".to_string(),
                        ))
                        .await;
                    }
                }

                () = ring_timer_elapsed(&mut self.ring_timer) => {
                    self.ring_timer = None;
                    self.on_ring_timeout().await;
                }

                () = resend_tick(&mut self.offer_resend) => {
                    self.resend_offer().await;
                }
            }
        }

        info!(
            target: "call.actor.session",
            call_id = %self.call_id,
            state = self.state.as_str(),
            messages_processed = self.mailbox.messages_processed(),
            "CallSessionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Start { respond_to } => {
                let result = self.start().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Hangup { respond_to } => {
                self.hangup().await;
                let _ = respond_to.send(());
            }

            SessionMessage::ToggleMute { respond_to } => {
                let result = self.live().and_then(|()| self.media.toggle_audio());
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleVideo { respond_to } => {
                let result = self.live().and_then(|()| self.media.toggle_video());
                let _ = respond_to.send(result);
            }

            SessionMessage::RemoteSignal { signal } => {
                self.handle_remote_signal(signal).await;
            }

            SessionMessage::GetInfo { respond_to } => {
                let _ = respond_to.send(self.info());
            }
        }
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    async fn start(&mut self) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::InvalidState(format!(
                "call already started (state {})",
                self.state
            )));
        }

        self.started_at = Some(Instant::now());
        self.transition(CallState::AwaitingMedia);

        let tracks = match self.media.acquire().await {
            Ok(tracks) => tracks,
            Err(e) => {
                self.fail(e.clone()).await;
                return Err(e);
            }
        };
        for track in tracks.tracks() {
            self.emit(CallEvent::LocalTrackReady(track.info()));
        }

        if let Err(e) = self.open_connection(&tracks).await {
            self.fail(e.clone()).await;
            return Err(e);
        }

        self.transition(CallState::Ringing);
        self.ring_timer = Some(Box::pin(tokio::time::sleep(self.ring_timeout)));
        self.emit(CallEvent::Ringing);
        info!(
            target: "call.actor.session",
            call_id = %self.call_id,
            role = self.role.as_str(),
            ring_timeout_secs = self.ring_timeout.as_secs(),
            "Call ringing"
        );

        if self.role == CallRole::Caller {
            if let Err(e) = self.send_offer().await {
                self.fail(e.clone()).await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Create the peer connection, attach local tracks, subscribe to the call
    /// channel.
    async fn open_connection(&mut self, tracks: &MediaTracks) -> Result<(), CallError> {
        let link = self.peers.create(&self.call_id).await?;
        let mut engine = NegotiationEngine::new(self.call_id.clone(), link.connection);
        self.peer_events = Some(link.events);
        let attached = engine.attach_tracks(tracks).await;
        self.engine = Some(engine);
        attached?;

        let subscription = self.transport.subscribe(&self.call_id).await?;
        self.subscription = Some(subscription);
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<(), CallError> {
        self.transition(CallState::Negotiating);

        let engine = self.engine_mut()?;
        let offer = engine.create_offer().await?;
        self.publish(Signal::offer(
            self.call_id.clone(),
            self.local_party_id.clone(),
            self.remote_party_id.clone(),
            offer,
        ))
        .await?;

        let mut resend = tokio::time::interval_at(
            Instant::now() + self.offer_resend_interval,
            self.offer_resend_interval,
        );
        resend.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.offer_resend = Some(resend);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound signals
    // ------------------------------------------------------------------

    async fn handle_remote_signal(&mut self, signal: Signal) {
        let kind = signal.kind();

        let drop_reason = if signal.call_id != self.call_id {
            Some("foreign_call")
        } else if signal.sender_id == self.local_party_id {
            Some("own_echo")
        } else if signal.sender_id != self.remote_party_id {
            Some("unexpected_party")
        } else if self.state.is_terminal() || self.state == CallState::Ending {
            Some("terminal")
        } else if self.engine.is_none() {
            Some("not_started")
        } else {
            None
        };
        if let Some(reason) = drop_reason {
            self.dropped(kind.as_str(), reason);
            return;
        }

        metrics::record_signal("inbound", kind.as_str());
        debug!(
            target: "call.actor.session",
            call_id = %self.call_id,
            signal_type = kind.as_str(),
            state = self.state.as_str(),
            "Remote signal received"
        );

        match signal.payload {
            SignalPayload::Offer(desc) => self.on_remote_offer(desc).await,
            SignalPayload::Answer(desc) => self.on_remote_answer(desc).await,
            SignalPayload::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            SignalPayload::EndCall => self.on_remote_end_call().await,
        }
    }

    async fn on_remote_offer(&mut self, desc: SessionDescription) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.remote_description_applied() {
            self.dropped("offer", "duplicate");
            return;
        }

        if engine.is_awaiting_answer() {
            // Glare: both sides offered. The lower party id keeps its offer.
            if self.local_party_id < self.remote_party_id {
                info!(
                    target: "call.actor.session",
                    call_id = %self.call_id,
                    "Glare: keeping local offer, ignoring remote offer"
                );
                self.dropped("offer", "glare");
                return;
            }
            info!(
                target: "call.actor.session",
                call_id = %self.call_id,
                "Glare: rolling back local offer to answer remote offer"
            );
            self.offer_resend = None;
            if let Err(e) = engine.rollback_local_offer().await {
                self.fail(e).await;
                return;
            }
        }

        match engine.handle_offer(desc).await {
            Ok(Some(answer)) => {
                if self.state == CallState::Ringing {
                    self.transition(CallState::Negotiating);
                }
                let signal = Signal::answer(
                    self.call_id.clone(),
                    self.local_party_id.clone(),
                    self.remote_party_id.clone(),
                    answer,
                );
                if let Err(e) = self.publish(signal).await {
                    self.fail(e).await;
                }
            }
            Ok(None) => self.dropped("offer", "duplicate"),
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_remote_answer(&mut self, desc: SessionDescription) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match engine.handle_answer(desc).await {
            Ok(true) => {
                self.offer_resend = None;
                debug!(
                    target: "call.actor.session",
                    call_id = %self.call_id,
                    "Answer applied, awaiting remote media"
                );
            }
            Ok(false) => self.dropped("answer", "duplicate"),
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let disposition = engine.handle_candidate(candidate).await;
        if disposition == CandidateDisposition::Buffered {
            debug!(
                target: "call.actor.session",
                call_id = %self.call_id,
                pending = engine.pending_candidates(),
                "Candidate buffered until remote description"
            );
        }
    }

    async fn on_remote_end_call(&mut self) {
        info!(
            target: "call.actor.session",
            call_id = %self.call_id,
            state = self.state.as_str(),
            "Remote party ended the call"
        );
        self.transition(CallState::Ending);
        self.teardown().await;
        self.finish(EndedBy::Remote);
    }

    // ------------------------------------------------------------------
    // Peer connection events
    // ------------------------------------------------------------------

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        if self.state.is_terminal() {
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if !matches!(
                    self.state,
                    CallState::Ringing | CallState::Negotiating | CallState::Connected
                ) {
                    return;
                }
                self.local_candidates.push(candidate.clone());
                let signal = Signal::ice_candidate(
                    self.call_id.clone(),
                    self.local_party_id.clone(),
                    self.remote_party_id.clone(),
                    candidate,
                );
                if let Err(e) = self.publish(signal).await {
                    self.fail(e).await;
                }
            }

            PeerEvent::RemoteTrack(track) => {
                self.remote_tracks.push(track.clone());
                self.emit(CallEvent::RemoteTrackReady(track));
                if matches!(self.state, CallState::Ringing | CallState::Negotiating) {
                    self.on_connected();
                }
            }

            PeerEvent::ConnectionFailed(reason) => {
                self.fail(CallError::ConnectionFailed(reason)).await;
            }
        }
    }

    fn on_connected(&mut self) {
        self.ring_timer = None;
        self.offer_resend = None;

        let now = Instant::now();
        self.connected_at = Some(now);
        if let Some(started_at) = self.started_at {
            metrics::record_setup_duration(now.saturating_duration_since(started_at));
        }

        self.transition(CallState::Connected);
        self.emit(CallEvent::Connected);
        info!(
            target: "call.actor.session",
            call_id = %self.call_id,
            remote_tracks = self.remote_tracks.len(),
            "Call connected"
        );
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn on_ring_timeout(&mut self) {
        if matches!(self.state, CallState::Ringing | CallState::Negotiating) {
            self.fail(CallError::CallNotAnswered).await;
        }
    }

    async fn resend_offer(&mut self) {
        let pending_offer = match (&self.state, self.engine.as_ref()) {
            (CallState::Negotiating, Some(engine)) => engine.pending_offer().cloned(),
            _ => None,
        };
        let Some(offer) = pending_offer else {
            self.offer_resend = None;
            return;
        };

        debug!(
            target: "call.actor.session",
            call_id = %self.call_id,
            candidates = self.local_candidates.len(),
            "Re-sending pending offer"
        );

        let mut outgoing = vec![Signal::offer(
            self.call_id.clone(),
            self.local_party_id.clone(),
            self.remote_party_id.clone(),
            offer,
        )];
        outgoing.extend(self.local_candidates.iter().cloned().map(|candidate| {
            Signal::ice_candidate(
                self.call_id.clone(),
                self.local_party_id.clone(),
                self.remote_party_id.clone(),
                candidate,
            )
        }));

        for signal in outgoing {
            if let Err(e) = self.publish(signal).await {
                self.fail(e).await;
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Local hangup. Sends `EndCall` (best effort), tears down, ends.
    async fn hangup(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!(
            target: "call.actor.session",
            call_id = %self.call_id,
            state = self.state.as_str(),
            "Local hangup"
        );

        let was_started = self.state != CallState::Idle;
        self.transition(CallState::Ending);
        if was_started {
            self.notify_remote_end().await;
        }
        self.teardown().await;
        self.finish(EndedBy::Local);
    }

    /// Fail the call. Runs the full teardown; never skipped.
    async fn fail(&mut self, err: CallError) {
        if self.state.is_terminal() {
            return;
        }
        if err.is_expected() {
            info!(
                target: "call.actor.session",
                call_id = %self.call_id,
                state = self.state.as_str(),
                reason = %err,
                "Call ended without answer"
            );
        } else {
            warn!(
                target: "call.actor.session",
                call_id = %self.call_id,
                state = self.state.as_str(),
                error = %err,
                "Call failed"
            );
        }

        if notifies_remote(&err) && self.engine.is_some() {
            self.notify_remote_end().await;
        }
        self.teardown().await;

        metrics::record_call_outcome(err.outcome_label());
        self.failure = Some(err.clone());
        self.transition(CallState::Failed);
        self.emit(CallEvent::Failed(err));
    }

    /// Best-effort `EndCall`; a publish failure is logged, never surfaced.
    async fn notify_remote_end(&mut self) {
        let signal = Signal::end_call(
            self.call_id.clone(),
            self.local_party_id.clone(),
            self.remote_party_id.clone(),
        );
        if let Err(e) = self.publish(signal).await {
            warn!(
                target: "call.actor.session",
                call_id = %self.call_id,
                error = %e,
                "Failed to notify remote party of call end"
            );
        }
    }

    /// Release everything the session owns. Idempotent.
    async fn teardown(&mut self) {
        self.ring_timer = None;
        self.offer_resend = None;
        if let Some(mut engine) = self.engine.take() {
            engine.close().await;
        }
        self.peer_events = None;
        self.subscription = None;
        self.media.release();
        self.remote_tracks.clear();
        self.local_candidates.clear();
    }

    fn finish(&mut self, ended_by: EndedBy) {
        let now = Instant::now();
        if let Some(connected_at) = self.connected_at {
            self.ended_at = Some(now);
            metrics::record_call_duration(now.saturating_duration_since(connected_at));
        }
        metrics::record_call_outcome("ended");
        self.transition(CallState::Ended);
        self.emit(CallEvent::Ended { ended_by });
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn transition(&mut self, next: CallState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!(
                target: "call.actor.session",
                call_id = %self.call_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Transition rejected"
            );
            return false;
        }

        debug!(
            target: "call.actor.session",
            call_id = %self.call_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "State transition"
        );
        self.state = next;
        self.history.push(StateChange {
            state: next,
            at: Utc::now(),
        });
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            failure: self.failure.clone(),
        });
        true
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn dropped(&self, signal_type: &str, reason: &'static str) {
        metrics::record_signal_dropped(reason);
        debug!(
            target: "call.actor.session",
            call_id = %self.call_id,
            signal_type = signal_type,
            reason = reason,
            "Signal dropped"
        );
    }

    async fn publish(&self, signal: Signal) -> Result<(), CallError> {
        let kind = signal.kind();
        self.transport.publish(&signal).await?;
        metrics::record_signal("outbound", kind.as_str());
        debug!(
            target: "call.actor.session",
            call_id = %self.call_id,
            signal_type = kind.as_str(),
            "Signal sent"
        );
        Ok(())
    }

    fn live(&self) -> Result<(), CallError> {
        if self.state.is_terminal() {
            return Err(CallError::InvalidState(format!(
                "call is {}",
                self.state
            )));
        }
        Ok(())
    }

    fn engine_mut(&mut self) -> Result<&mut NegotiationEngine, CallError> {
        self.engine
            .as_mut()
            .ok_or_else(|| CallError::Internal("negotiation engine missing".to_string()))
    }

    fn info(&self) -> CallInfo {
        let duration = self.snapshot.borrow().duration_at(Instant::now());
        CallInfo {
            call_id: self.call_id.clone(),
            local_party_id: self.local_party_id.clone(),
            remote_party_id: self.remote_party_id.clone(),
            role: self.role,
            state: self.state,
            duration,
            failure: self.failure.clone(),
            local_media: self.media.has_tracks(),
            audio_enabled: self.media.audio_enabled(),
            video_enabled: self.media.video_enabled(),
            remote_tracks: self.remote_tracks.len(),
            pending_candidates: self
                .engine
                .as_ref()
                .map_or(0, NegotiationEngine::pending_candidates),
            created_at: self.created_at,
            state_history: self.history.clone(),
        }
    }
}

/// Failures after which the remote side is told to stop ringing.
fn notifies_remote(err: &CallError) -> bool {
    matches!(
        err,
        CallError::CallNotAnswered | CallError::NegotiationFailed(_) | CallError::ConnectionFailed(_)
    )
}

async fn next_signal(subscription: &mut Option<SignalSubscription>) -> Option<Signal> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => pending().await,
    }
}

async fn next_peer_event(events: &mut Option<mpsc::Receiver<PeerEvent>>) -> Option<PeerEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

async fn ring_timer_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn resend_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
