//! `CallRegistryActor` - singleton owner of every `CallSession` in the process.
//!
//! - Keyed by `CallId`; at most one live session per id
//! - Spawns `CallSessionActor`s with a child of its own `CancellationToken`
//! - Reaps terminal sessions into a bounded history of `CallSummary`s
//! - Detects panicked session tasks via `JoinHandle`
//!
//! # Graceful Shutdown
//!
//! On `shutdown()` (or cancellation) the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels every session, which hangs up live calls
//! 3. Awaits each session task with a timeout

use super::messages::{CallRole, CallSummary, RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{CallDependencies, CallSessionActor, CallSessionHandle, SessionParams};
use crate::config::Config;
use crate::errors::CallError;
use crate::observability::metrics as prom;
use crate::profile::{PartyProfile, ProfileDirectory};
use crate::transport::RetryingTransport;

use chrono::Utc;
use common::types::{CallId, PartyId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 256;

/// Finished calls kept for `recent_calls`.
pub const CALL_HISTORY_LIMIT: usize = 32;

/// How often terminal sessions are reaped.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Wait for a reaped session task to exit.
const REAP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for each session task during shutdown.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the `CallRegistryActor`.
#[derive(Clone)]
pub struct CallRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    local_party_id: PartyId,
    profiles: Option<Arc<dyn ProfileDirectory>>,
    mailbox: Arc<MailboxMonitor>,
}

impl CallRegistryHandle {
    /// Spawn the registry actor for the authenticated `local_party_id`.
    ///
    /// The configured transport is wrapped in a `RetryingTransport` built
    /// from `config.retry_policy()`.
    #[must_use]
    pub fn new(
        local_party_id: PartyId,
        config: &Config,
        deps: CallDependencies,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Registry,
            local_party_id.as_str(),
        ));

        let profiles = deps.profiles.clone();
        let deps = CallDependencies {
            transport: Arc::new(RetryingTransport::new(deps.transport, config.retry_policy())),
            ..deps
        };

        let actor = CallRegistryActor::new(
            local_party_id.clone(),
            config.clone(),
            deps,
            receiver,
            cancel_token.clone(),
            metrics,
            Arc::clone(&mailbox),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            local_party_id,
            profiles,
            mailbox,
        }
    }

    /// Create (but do not start) a session.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a live session exists for `call_id` or the registry
    /// is shutting down.
    pub async fn create_call(
        &self,
        call_id: CallId,
        remote_party_id: PartyId,
        role: CallRole,
    ) -> Result<CallSessionHandle, CallError> {
        self.request(|respond_to| RegistryMessage::CreateCall {
            call_id,
            remote_party_id,
            role,
            respond_to,
        })
        .await?
    }

    /// Create a session and start it.
    ///
    /// The handle is returned only if `start` succeeded; a failed start
    /// leaves a `Failed` session behind for the reaper.
    ///
    /// # Errors
    ///
    /// Any error from `create_call` or `CallSessionHandle::start`.
    pub async fn start_call(
        &self,
        call_id: CallId,
        remote_party_id: PartyId,
        role: CallRole,
    ) -> Result<CallSessionHandle, CallError> {
        let handle = self.create_call(call_id, remote_party_id, role).await?;
        handle.start().await?;
        Ok(handle)
    }

    /// Originate a call to `remote_party_id` under a fresh call id.
    ///
    /// # Errors
    ///
    /// See `start_call`.
    pub async fn place_call(&self, remote_party_id: PartyId) -> Result<CallSessionHandle, CallError> {
        self.start_call(CallId::generate(), remote_party_id, CallRole::Caller)
            .await
    }

    /// Join a call someone else originated.
    ///
    /// # Errors
    ///
    /// See `start_call`.
    pub async fn answer_call(
        &self,
        call_id: CallId,
        caller: PartyId,
    ) -> Result<CallSessionHandle, CallError> {
        self.start_call(call_id, caller, CallRole::Receiver).await
    }

    /// Look up the live session for a call.
    ///
    /// # Errors
    ///
    /// `CallNotFound` if no session is held for `call_id`.
    pub async fn get_call(&self, call_id: CallId) -> Result<CallSessionHandle, CallError> {
        self.request(|respond_to| RegistryMessage::GetCall {
            call_id,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// `Internal` if the registry actor has stopped.
    pub async fn status(&self) -> Result<RegistryStatus, CallError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Summaries of recently finished calls, oldest first.
    ///
    /// # Errors
    ///
    /// `Internal` if the registry actor has stopped.
    pub async fn recent_calls(&self) -> Result<Vec<CallSummary>, CallError> {
        self.request(|respond_to| RegistryMessage::RecentCalls { respond_to })
            .await
    }

    /// Resolve display metadata for a party. Never touches session state.
    pub async fn lookup_profile(&self, party_id: &PartyId) -> Option<PartyProfile> {
        match &self.profiles {
            Some(profiles) => profiles.lookup(party_id).await,
            None => None,
        }
    }

    /// Hang up every call and stop the registry.
    ///
    /// # Errors
    ///
    /// `Internal` if the registry actor has already stopped.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the registry (and with it every session) without waiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token tied to the registry lifetime.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    #[must_use]
    pub fn local_party_id(&self) -> &PartyId {
        &self.local_party_id
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
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

/// Internal state for a managed session.
struct ManagedCall {
    handle: CallSessionHandle,
    task_handle: JoinHandle<()>,
    remote_party_id: PartyId,
    role: CallRole,
}

/// The `CallRegistryActor` implementation.
pub struct CallRegistryActor {
    local_party_id: PartyId,
    config: Config,
    deps: CallDependencies,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    calls: HashMap<CallId, ManagedCall>,
    history: VecDeque<CallSummary>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl CallRegistryActor {
    fn new(
        local_party_id: PartyId,
        config: Config,
        deps: CallDependencies,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        mailbox: Arc<MailboxMonitor>,
    ) -> Self {
        Self {
            local_party_id,
            config,
            deps,
            receiver,
            cancel_token,
            calls: HashMap::new(),
            history: VecDeque::with_capacity(CALL_HISTORY_LIMIT),
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "call.actor.registry", fields(party_id = %self.local_party_id))]
    async fn run(mut self) {
        info!(
            target: "call.actor.registry",
            party_id = %self.local_party_id,
            "CallRegistryActor started"
        );

        let mut reap = reap_interval();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "call.actor.registry",
                        party_id = %self.local_party_id,
                        "CallRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(RegistryMessage::Shutdown { respond_to }) => {
                            self.graceful_shutdown().await;
                            self.mailbox.record_dequeue();
                            let _ = respond_to.send(Ok(()));
                            self.cancel_token.cancel();
                            break;
                        }
                        Some(message) => {
                            self.reap_finished_calls();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "call.actor.registry",
                                party_id = %self.local_party_id,
                                "CallRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                _ = reap.tick() => {
                    self.reap_finished_calls();
                    self.report_mailbox_depth();
                }
            }
        }

        info!(
            target: "call.actor.registry",
            party_id = %self.local_party_id,
            calls_remaining = self.calls.len(),
            messages_processed = self.mailbox.messages_processed(),
            "CallRegistryActor stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateCall {
                call_id,
                remote_party_id,
                role,
                respond_to,
            } => {
                let result = self.create_call(call_id, remote_party_id, role);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetCall {
                call_id,
                respond_to,
            } => {
                let result = self
                    .calls
                    .get(&call_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| CallError::CallNotFound(call_id.to_string()));
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::RecentCalls { respond_to } => {
                let _ = respond_to.send(self.history.iter().cloned().collect());
            }

            // Handled in the run loop.
            RegistryMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(Err(CallError::Internal(
                    "shutdown routed to message handler".to_string(),
                )));
            }
        }
    }

    fn create_call(
        &mut self,
        call_id: CallId,
        remote_party_id: PartyId,
        role: CallRole,
    ) -> Result<CallSessionHandle, CallError> {
        if !self.accepting_new {
            return Err(CallError::InvalidState(
                "registry is shutting down".to_string(),
            ));
        }

        if let Some(existing) = self.calls.get(&call_id) {
            return Err(CallError::InvalidState(format!(
                "call {call_id} already in progress (state {})",
                existing.handle.state()
            )));
        }

        if remote_party_id == self.local_party_id {
            return Err(CallError::InvalidState(
                "cannot call yourself".to_string(),
            ));
        }

        let params = SessionParams::new(
            call_id.clone(),
            self.local_party_id.clone(),
            remote_party_id.clone(),
            role,
            &self.config,
        );
        let (handle, task_handle) = CallSessionActor::spawn(
            params,
            self.deps.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.calls.insert(
            call_id.clone(),
            ManagedCall {
                handle: handle.clone(),
                task_handle,
                remote_party_id,
                role,
            },
        );
        self.metrics.session_created();

        info!(
            target: "call.actor.registry",
            party_id = %self.local_party_id,
            call_id = %call_id,
            role = role.as_str(),
            total_calls = self.calls.len(),
            "Call session created"
        );

        Ok(handle)
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            call_count: self.calls.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            finished_calls: self.history.len(),
        }
    }

    /// Remove terminal sessions and sessions whose task has exited.
    fn reap_finished_calls(&mut self) {
        let finished: Vec<CallId> = self
            .calls
            .iter()
            .filter(|(_, managed)| {
                managed.handle.state().is_terminal() || managed.task_handle.is_finished()
            })
            .map(|(call_id, _)| call_id.clone())
            .collect();

        for call_id in finished {
            let Some(managed) = self.calls.remove(&call_id) else {
                continue;
            };

            let summary = summarize(&call_id, &managed);
            if !summary.final_state.is_terminal() {
                warn!(
                    target: "call.actor.registry",
                    party_id = %self.local_party_id,
                    call_id = %call_id,
                    state = summary.final_state.as_str(),
                    "Call session task finished unexpectedly"
                );
            }

            managed.handle.cancel();
            self.await_session_exit(call_id.clone(), managed.task_handle);

            if self.history.len() >= CALL_HISTORY_LIMIT {
                self.history.pop_front();
            }
            self.history.push_back(summary);
            self.metrics.session_removed();

            debug!(
                target: "call.actor.registry",
                party_id = %self.local_party_id,
                call_id = %call_id,
                total_calls = self.calls.len(),
                "Call session reaped"
            );
        }
    }

    /// Wait for a reaped session task in the background; don't block the loop.
    fn await_session_exit(&self, call_id: CallId, task_handle: JoinHandle<()>) {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match tokio::time::timeout(REAP_JOIN_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "call.actor.registry",
                        call_id = %call_id,
                        "Call session task completed cleanly"
                    );
                }
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        error!(
                            target: "call.actor.registry",
                            call_id = %call_id,
                            error = ?join_error,
                            "Call session actor panicked"
                        );
                        metrics.record_panic(ActorType::Session);
                    }
                }
                Err(_) => {
                    warn!(
                        target: "call.actor.registry",
                        call_id = %call_id,
                        "Call session task cleanup timed out"
                    );
                }
            }
        });
    }

    fn report_mailbox_depth(&self) {
        prom::set_actor_mailbox_depth(ActorType::Registry.as_str(), self.mailbox.current_depth());
        let session_depth = self
            .calls
            .values()
            .map(|managed| managed.handle.mailbox_depth())
            .sum();
        prom::set_actor_mailbox_depth(ActorType::Session.as_str(), session_depth);
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "call.actor.registry",
            party_id = %self.local_party_id,
            call_count = self.calls.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.calls.values() {
            managed.handle.cancel();
        }

        let calls: Vec<(CallId, ManagedCall)> = self.calls.drain().collect();
        for (call_id, managed) in calls {
            let ManagedCall {
                handle,
                task_handle,
                remote_party_id,
                role,
            } = managed;

            match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "call.actor.registry",
                        party_id = %self.local_party_id,
                        call_id = %call_id,
                        "Call session completed cleanly"
                    );
                }
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        self.metrics.record_panic(ActorType::Session);
                    }
                    warn!(
                        target: "call.actor.registry",
                        party_id = %self.local_party_id,
                        call_id = %call_id,
                        error = ?join_error,
                        "Call session task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "call.actor.registry",
                        party_id = %self.local_party_id,
                        call_id = %call_id,
                        "Call session shutdown timed out"
                    );
                }
            }

            if self.history.len() >= CALL_HISTORY_LIMIT {
                self.history.pop_front();
            }
            self.history.push_back(CallSummary {
                call_id,
                remote_party_id,
                role,
                final_state: handle.state(),
                failure: handle.failure(),
                duration: handle.duration(),
                finished_at: Utc::now(),
            });
            self.metrics.session_removed();
        }

        info!(
            target: "call.actor.registry",
            party_id = %self.local_party_id,
            "Graceful shutdown complete"
        );
    }
}

fn reap_interval() -> Interval {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn summarize(call_id: &CallId, managed: &ManagedCall) -> CallSummary {
    let final_state = managed.handle.state();
    let failure = managed.handle.failure().or_else(|| {
        (!final_state.is_terminal())
            .then(|| CallError::Internal("session task exited".to_string()))
    });
    CallSummary {
        call_id: call_id.clone(),
        remote_party_id: managed.remote_party_id.clone(),
        role: managed.role,
        final_state,
        failure,
        duration: managed.handle.duration(),
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::CallState;
    use crate::media::{LocalTrack, MediaCapture, MediaConstraints, MediaError, MediaTracks, TrackKind};
    use crate::negotiation::{PeerConnection, PeerConnectionFactory, PeerError, PeerLink};
    use crate::profile::StaticProfileDirectory;
    use crate::signal::{IceCandidate, SessionDescription};
    use crate::transport::InMemorySignalBus;
    use async_trait::async_trait;

    struct Track(TrackKind);

    impl LocalTrack for Track {
        fn id(&self) -> &str {
            self.0.as_str()
        }
        fn kind(&self) -> TrackKind {
            self.0
        }
        fn set_enabled(&self, _: bool) {}
        fn is_enabled(&self) -> bool {
            true
        }
        fn stop(&self) {}
    }

    struct Capture;

    #[async_trait]
    impl MediaCapture for Capture {
        async fn acquire(&self, _: MediaConstraints) -> Result<MediaTracks, MediaError> {
            Ok(MediaTracks::new(vec![Arc::new(Track(TrackKind::Audio))]))
        }
    }

    struct Peer;

    #[async_trait]
    impl PeerConnection for Peer {
        async fn add_track(&mut self, _: Arc<dyn LocalTrack>) -> Result<(), PeerError> {
            Ok(())
        }
        async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
            Ok(SessionDescription::offer("v=0"))
        }
        async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
            Ok(SessionDescription::answer("v=0"))
        }
        async fn set_local_description(&mut self, _: SessionDescription) -> Result<(), PeerError> {
            Ok(())
        }
        async fn set_remote_description(&mut self, _: SessionDescription) -> Result<(), PeerError> {
            Ok(())
        }
        async fn add_ice_candidate(&mut self, _: IceCandidate) -> Result<(), PeerError> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<(), PeerError> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct Peers {
        senders: std::sync::Mutex<Vec<mpsc::Sender<crate::negotiation::PeerEvent>>>,
    }

    #[async_trait]
    impl PeerConnectionFactory for Peers {
        async fn create(&self, _: &CallId) -> Result<PeerLink, PeerError> {
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            Ok(PeerLink {
                connection: Box::new(Peer),
                events: rx,
            })
        }
    }

    fn registry() -> (CallRegistryHandle, Arc<ActorMetrics>) {
        let metrics = ActorMetrics::new();
        let profiles = StaticProfileDirectory::new().with_profile(PartyProfile::new(
            PartyId::from("bob"),
            "Bob",
        ));
        let deps = CallDependencies::new(
            Arc::new(Capture),
            Arc::new(Peers::default()),
            Arc::new(InMemorySignalBus::new()),
        )
        .with_profiles(Arc::new(profiles));
        let handle = CallRegistryHandle::new(
            PartyId::from("alice"),
            &Config::default(),
            deps,
            Arc::clone(&metrics),
        );
        (handle, metrics)
    }

    #[tokio::test]
    async fn test_registry_create_and_get_call() {
        let (registry, metrics) = registry();

        let handle = registry
            .create_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Caller)
            .await
            .unwrap();
        assert_eq!(handle.state(), CallState::Idle);

        let fetched = registry.get_call(CallId::from("call-1")).await.unwrap();
        assert_eq!(fetched.call_id(), &CallId::from("call-1"));
        assert_eq!(metrics.session_count(), 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_duplicate_live_call_rejected() {
        let (registry, _) = registry();
        registry
            .create_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Caller)
            .await
            .unwrap();

        let result = registry
            .create_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Caller)
            .await;

        assert!(matches!(result, Err(CallError::InvalidState(_))));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_get_nonexistent_call() {
        let (registry, _) = registry();

        let result = registry.get_call(CallId::from("missing")).await;

        assert!(matches!(result, Err(CallError::CallNotFound(_))));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_rejects_self_call() {
        let (registry, _) = registry();

        let result = registry.place_call(PartyId::from("alice")).await;

        assert!(matches!(result, Err(CallError::InvalidState(_))));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_reaps_ended_call_and_allows_restart() {
        let (registry, metrics) = registry();
        let handle = registry
            .start_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Receiver)
            .await
            .unwrap();
        handle.hangup().await;

        // Reaped before the next message is handled.
        let restarted = registry
            .create_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Receiver)
            .await
            .unwrap();
        assert_eq!(restarted.state(), CallState::Idle);

        let recent = registry.recent_calls().await.unwrap();
        assert_eq!(recent.len(), 1);
        let summary = recent.first().unwrap();
        assert_eq!(summary.final_state, CallState::Ended);
        assert_eq!(summary.role, CallRole::Receiver);
        assert_eq!(metrics.session_count(), 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_status() {
        let (registry, _) = registry();
        registry
            .create_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Caller)
            .await
            .unwrap();

        let status = registry.status().await.unwrap();

        assert_eq!(status.call_count, 1);
        assert!(!status.is_draining);
        assert_eq!(status.finished_calls, 0);
        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_shutdown_hangs_up_calls() {
        let (registry, metrics) = registry();
        let handle = registry
            .start_call(CallId::from("call-1"), PartyId::from("bob"), CallRole::Receiver)
            .await
            .unwrap();

        registry.shutdown().await.unwrap();

        assert_eq!(handle.state(), CallState::Ended);
        assert!(registry.is_cancelled());
        assert_eq!(metrics.session_count(), 0);
        assert!(matches!(
            registry
                .create_call(CallId::from("call-2"), PartyId::from("bob"), CallRole::Caller)
                .await,
            Err(CallError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_lookup_profile() {
        let (registry, _) = registry();

        let profile = registry.lookup_profile(&PartyId::from("bob")).await.unwrap();
        assert_eq!(profile.display_name, "Bob");
        assert!(registry.lookup_profile(&PartyId::from("carol")).await.is_none());
        registry.cancel();
    }
}
