//! Negotiation engine.
//!
//! Drives offer/answer creation and application against the single peer
//! connection of a call, and routes remote candidates either straight to the
//! connection or into the [`CandidateBuffer`] until the remote description is
//! known.
//!
//! The peer connection never calls back into the session. Everything it
//! reports asynchronously (gathered candidates, remote tracks, failure) comes
//! out of the [`PeerEvent`] receiver handed over by the factory, which the
//! session actor polls alongside its mailbox.
//!
//! # Phases
//!
//! ```text
//! Idle ──create_offer──▶ AwaitingAnswer ──handle_answer──▶ Stable
//!   │                         │
//!   │                         └──rollback_local_offer──▶ Idle
//!   └────────handle_offer───────────────────────────────▶ Stable
//! any ──close──▶ Closed
//! ```
//!
//! The remote description is applied at most once; later Offers/Answers are
//! reported as duplicates and ignored.

pub mod candidates;

pub use candidates::{CandidateBuffer, MAX_PENDING_CANDIDATES};

use crate::errors::CallError;
use crate::media::{LocalTrack, MediaTracks, TrackInfo};
use crate::signal::{IceCandidate, SessionDescription};

use async_trait::async_trait;
use common::types::CallId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Errors reported by the peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Peer connection operation failed: {0}")]
    Operation(String),

    #[error("Peer connection closed")]
    Closed,
}

/// Asynchronous notifications from the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local network candidate was gathered and should be trickled.
    LocalCandidate(IceCandidate),
    /// Remote media arrived.
    RemoteTrack(TrackInfo),
    /// The connection failed irrecoverably.
    ConnectionFailed(String),
}

/// The underlying peer connection object.
///
/// `Sync` so the owning session actor can be held across awaits on a
/// multi-threaded runtime.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&mut self, track: Arc<dyn LocalTrack>) -> Result<(), PeerError>;
    async fn create_offer(&mut self) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), PeerError>;
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError>;
    /// Discard a pending local offer.
    async fn rollback(&mut self) -> Result<(), PeerError>;
    async fn close(&mut self);
}

/// A freshly created peer connection plus its event stream.
pub struct PeerLink {
    pub connection: Box<dyn PeerConnection>,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Creates one peer connection per call.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, call_id: &CallId) -> Result<PeerLink, PeerError>;
}

/// Negotiation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    AwaitingAnswer,
    Stable,
    Closed,
}

/// What happened to a remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Buffered,
    /// Rejected by the connection or the buffer; tolerated.
    Rejected,
}

/// Owner of the peer connection and the pending candidate queue.
pub struct NegotiationEngine {
    call_id: CallId,
    connection: Box<dyn PeerConnection>,
    candidates: CandidateBuffer,
    phase: NegotiationPhase,
    remote_applied: bool,
    local_offer: Option<SessionDescription>,
}

impl NegotiationEngine {
    #[must_use]
    pub fn new(call_id: CallId, connection: Box<dyn PeerConnection>) -> Self {
        Self {
            call_id,
            connection,
            candidates: CandidateBuffer::new(),
            phase: NegotiationPhase::Idle,
            remote_applied: false,
            local_offer: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    #[must_use]
    pub fn is_awaiting_answer(&self) -> bool {
        self.phase == NegotiationPhase::AwaitingAnswer
    }

    #[must_use]
    pub fn remote_description_applied(&self) -> bool {
        self.remote_applied
    }

    /// Local offer awaiting an answer, for re-transmission.
    #[must_use]
    pub fn pending_offer(&self) -> Option<&SessionDescription> {
        self.local_offer.as_ref()
    }

    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Hand every local track to the connection.
    ///
    /// # Errors
    ///
    /// `NegotiationFailed` if the connection refuses a track.
    pub async fn attach_tracks(&mut self, tracks: &MediaTracks) -> Result<(), CallError> {
        for track in tracks.tracks() {
            self.connection.add_track(Arc::clone(track)).await?;
        }
        debug!(
            target: "call.negotiation",
            call_id = %self.call_id,
            tracks = tracks.len(),
            "Local tracks attached"
        );
        Ok(())
    }

    /// Create an offer and set it as the local description.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless idle; `NegotiationFailed` if the connection
    /// cannot produce or apply the offer.
    pub async fn create_offer(&mut self) -> Result<SessionDescription, CallError> {
        if self.phase != NegotiationPhase::Idle {
            return Err(CallError::InvalidState(format!(
                "cannot create offer in phase {:?}",
                self.phase
            )));
        }

        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.phase = NegotiationPhase::AwaitingAnswer;
        self.local_offer = Some(offer.clone());

        debug!(target: "call.negotiation", call_id = %self.call_id, "Local offer set");
        Ok(offer)
    }

    /// Apply a remote offer and produce the answer to send back.
    ///
    /// Returns `Ok(None)` when the remote description is already applied
    /// (duplicate delivery).
    ///
    /// # Errors
    ///
    /// `InvalidState` while a local offer is pending or after close;
    /// `NegotiationFailed` if the offer is rejected.
    pub async fn handle_offer(
        &mut self,
        desc: SessionDescription,
    ) -> Result<Option<SessionDescription>, CallError> {
        if self.remote_applied {
            debug!(target: "call.negotiation", call_id = %self.call_id, "Duplicate offer ignored");
            return Ok(None);
        }
        match self.phase {
            NegotiationPhase::Idle => {}
            NegotiationPhase::AwaitingAnswer => {
                return Err(CallError::InvalidState(
                    "remote offer while local offer pending".to_string(),
                ));
            }
            NegotiationPhase::Stable | NegotiationPhase::Closed => {
                return Err(CallError::InvalidState(format!(
                    "cannot handle offer in phase {:?}",
                    self.phase
                )));
            }
        }

        self.connection.set_remote_description(desc).await?;
        self.remote_applied = true;
        self.drain_candidates().await;

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        self.phase = NegotiationPhase::Stable;

        debug!(target: "call.negotiation", call_id = %self.call_id, "Remote offer applied, answer created");
        Ok(Some(answer))
    }

    /// Apply a remote answer to the pending local offer.
    ///
    /// Returns `Ok(false)` when not awaiting an answer (duplicate or stray).
    ///
    /// # Errors
    ///
    /// `NegotiationFailed` if the answer is rejected.
    pub async fn handle_answer(&mut self, desc: SessionDescription) -> Result<bool, CallError> {
        if self.remote_applied || self.phase != NegotiationPhase::AwaitingAnswer {
            debug!(
                target: "call.negotiation",
                call_id = %self.call_id,
                phase = ?self.phase,
                "Answer ignored, not awaiting one"
            );
            return Ok(false);
        }

        self.connection.set_remote_description(desc).await?;
        self.remote_applied = true;
        self.phase = NegotiationPhase::Stable;
        self.local_offer = None;
        self.drain_candidates().await;

        debug!(target: "call.negotiation", call_id = %self.call_id, "Remote answer applied");
        Ok(true)
    }

    /// Apply a remote candidate now, or queue it until the remote description
    /// is applied. Never fails the call.
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> CandidateDisposition {
        if self.phase == NegotiationPhase::Closed {
            return CandidateDisposition::Rejected;
        }
        if !self.remote_applied {
            return if self.candidates.push(candidate) {
                CandidateDisposition::Buffered
            } else {
                CandidateDisposition::Rejected
            };
        }
        if self.apply_candidate(candidate).await {
            CandidateDisposition::Applied
        } else {
            CandidateDisposition::Rejected
        }
    }

    /// Discard the pending local offer so a remote offer can be answered.
    ///
    /// # Errors
    ///
    /// `NegotiationFailed` if the connection cannot roll back.
    pub async fn rollback_local_offer(&mut self) -> Result<(), CallError> {
        if self.phase != NegotiationPhase::AwaitingAnswer {
            return Ok(());
        }
        self.connection.rollback().await?;
        self.phase = NegotiationPhase::Idle;
        self.local_offer = None;
        debug!(target: "call.negotiation", call_id = %self.call_id, "Local offer rolled back");
        Ok(())
    }

    /// Close the connection and discard pending candidates. Idempotent.
    pub async fn close(&mut self) {
        if self.phase == NegotiationPhase::Closed {
            return;
        }
        self.connection.close().await;
        self.phase = NegotiationPhase::Closed;
        self.local_offer = None;
        let discarded = self.candidates.drain().len();
        debug!(
            target: "call.negotiation",
            call_id = %self.call_id,
            discarded_candidates = discarded,
            "Peer connection closed"
        );
    }

    async fn drain_candidates(&mut self) {
        let pending = self.candidates.drain();
        if pending.is_empty() {
            return;
        }
        let count = pending.len();
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
        debug!(
            target: "call.negotiation",
            call_id = %self.call_id,
            count = count,
            "Buffered candidates applied"
        );
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> bool {
        match self.connection.add_ice_candidate(candidate).await {
            Ok(()) => true,
            Err(e) => {
                // Stale or duplicate candidates are harmless.
                warn!(
                    target: "call.negotiation",
                    call_id = %self.call_id,
                    error = %e,
                    "Remote candidate rejected"
                );
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        ops: Vec<String>,
        candidates: Vec<String>,
    }

    /// Records operations; rejects descriptions whose SDP contains "bad".
    struct ScriptedPeer {
        log: Arc<Mutex<Log>>,
    }

    impl ScriptedPeer {
        fn new() -> (Box<dyn PeerConnection>, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            (Box::new(Self { log: log.clone() }), log)
        }

        fn record(&self, op: &str) {
            self.log.lock().unwrap().ops.push(op.to_string());
        }
    }

    #[async_trait]
    impl PeerConnection for ScriptedPeer {
        async fn add_track(&mut self, track: Arc<dyn LocalTrack>) -> Result<(), PeerError> {
            self.record(&format!("add_track:{}", track.id()));
            Ok(())
        }
        async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
            self.record("create_offer");
            Ok(SessionDescription::offer("v=0 local-offer"))
        }
        async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
            self.record("create_answer");
            Ok(SessionDescription::answer("v=0 local-answer"))
        }
        async fn set_local_description(&mut self, _: SessionDescription) -> Result<(), PeerError> {
            self.record("set_local");
            Ok(())
        }
        async fn set_remote_description(
            &mut self,
            desc: SessionDescription,
        ) -> Result<(), PeerError> {
            if desc.sdp.contains("bad") {
                return Err(PeerError::InvalidDescription("unparseable".to_string()));
            }
            self.record("set_remote");
            Ok(())
        }
        async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
            if candidate.candidate.contains("stale") {
                return Err(PeerError::Operation("unknown ufrag".to_string()));
            }
            self.log.lock().unwrap().candidates.push(candidate.candidate);
            Ok(())
        }
        async fn rollback(&mut self) -> Result<(), PeerError> {
            self.record("rollback");
            Ok(())
        }
        async fn close(&mut self) {
            self.record("close");
        }
    }

    fn engine() -> (NegotiationEngine, Arc<Mutex<Log>>) {
        let (peer, log) = ScriptedPeer::new();
        (NegotiationEngine::new(CallId::from("call-1"), peer), log)
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_offer_then_applied_in_order() {
        let (mut engine, log) = engine();

        for n in 0..3 {
            let disposition = engine
                .handle_candidate(IceCandidate::new(format!("candidate:{n}")))
                .await;
            assert_eq!(disposition, CandidateDisposition::Buffered);
        }
        assert_eq!(engine.pending_candidates(), 3);
        assert!(log.lock().unwrap().candidates.is_empty());

        let answer = engine
            .handle_offer(SessionDescription::offer("v=0 remote"))
            .await
            .unwrap();

        assert_eq!(answer, Some(SessionDescription::answer("v=0 local-answer")));
        assert_eq!(engine.pending_candidates(), 0);
        assert_eq!(
            log.lock().unwrap().candidates,
            vec!["candidate:0", "candidate:1", "candidate:2"]
        );
        assert_eq!(engine.phase(), NegotiationPhase::Stable);

        // Buffered candidates were applied before the answer was created.
        let ops = log.lock().unwrap().ops.clone();
        assert_eq!(ops, vec!["set_remote", "create_answer", "set_local"]);
    }

    #[tokio::test]
    async fn test_candidate_after_remote_applied_goes_straight_through() {
        let (mut engine, log) = engine();
        engine.create_offer().await.unwrap();
        engine
            .handle_answer(SessionDescription::answer("v=0 remote"))
            .await
            .unwrap();

        let disposition = engine.handle_candidate(IceCandidate::new("candidate:9")).await;

        assert_eq!(disposition, CandidateDisposition::Applied);
        assert_eq!(log.lock().unwrap().candidates, vec!["candidate:9"]);
    }

    #[tokio::test]
    async fn test_rejected_candidate_is_tolerated() {
        let (mut engine, log) = engine();
        engine.handle_candidate(IceCandidate::new("stale-1")).await;
        engine.handle_candidate(IceCandidate::new("candidate:1")).await;

        engine
            .handle_offer(SessionDescription::offer("v=0 remote"))
            .await
            .unwrap();

        assert_eq!(log.lock().unwrap().candidates, vec!["candidate:1"]);
        assert_eq!(
            engine.handle_candidate(IceCandidate::new("stale-2")).await,
            CandidateDisposition::Rejected
        );
    }

    #[tokio::test]
    async fn test_remote_description_applied_at_most_once() {
        let (mut engine, log) = engine();
        engine
            .handle_offer(SessionDescription::offer("v=0 remote"))
            .await
            .unwrap();

        let second = engine
            .handle_offer(SessionDescription::offer("v=0 remote"))
            .await
            .unwrap();

        assert_eq!(second, None);
        let set_remote_count = log
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| *op == "set_remote")
            .count();
        assert_eq!(set_remote_count, 1);
    }

    #[tokio::test]
    async fn test_answer_only_accepted_while_awaiting() {
        let (mut engine, _log) = engine();

        // No offer yet.
        assert!(!engine
            .handle_answer(SessionDescription::answer("v=0 early"))
            .await
            .unwrap());

        let offer = engine.create_offer().await.unwrap();
        assert_eq!(engine.pending_offer(), Some(&offer));
        assert!(engine.is_awaiting_answer());

        assert!(engine
            .handle_answer(SessionDescription::answer("v=0 remote"))
            .await
            .unwrap());
        assert!(engine.pending_offer().is_none());

        // Duplicate answer.
        assert!(!engine
            .handle_answer(SessionDescription::answer("v=0 remote"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_malformed_description_is_negotiation_failure() {
        let (mut engine, _log) = engine();

        let result = engine
            .handle_offer(SessionDescription::offer("v=0 bad"))
            .await;

        assert!(matches!(result, Err(CallError::NegotiationFailed(_))));
        assert!(!engine.remote_description_applied());
    }

    #[tokio::test]
    async fn test_offer_while_local_offer_pending_requires_rollback() {
        let (mut engine, log) = engine();
        engine.create_offer().await.unwrap();

        let result = engine
            .handle_offer(SessionDescription::offer("v=0 remote"))
            .await;
        assert!(matches!(result, Err(CallError::InvalidState(_))));

        engine.rollback_local_offer().await.unwrap();
        assert_eq!(engine.phase(), NegotiationPhase::Idle);
        let answer = engine
            .handle_offer(SessionDescription::offer("v=0 remote"))
            .await
            .unwrap();
        assert!(answer.is_some());
        assert!(log.lock().unwrap().ops.contains(&"rollback".to_string()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_discards_buffer() {
        let (mut engine, log) = engine();
        engine.handle_candidate(IceCandidate::new("candidate:0")).await;

        engine.close().await;
        engine.close().await;

        assert_eq!(engine.phase(), NegotiationPhase::Closed);
        assert_eq!(engine.pending_candidates(), 0);
        let closes = log
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| *op == "close")
            .count();
        assert_eq!(closes, 1);
        assert_eq!(
            engine.handle_candidate(IceCandidate::new("candidate:1")).await,
            CandidateDisposition::Rejected
        );
    }

    #[tokio::test]
    async fn test_create_offer_twice_is_invalid_state() {
        let (mut engine, _log) = engine();
        engine.create_offer().await.unwrap();
        assert!(matches!(
            engine.create_offer().await,
            Err(CallError::InvalidState(_))
        ));
    }

    fn assert_send_sync<T: Send + Sync + ?Sized>() {}

    #[test]
    fn test_engine_can_be_shared_across_awaits() {
        assert_send_sync::<dyn PeerConnection>();
        assert_send_sync::<NegotiationEngine>();
    }
}
