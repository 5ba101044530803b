//! Fake peer connections.
//!
//! `FakePeerFactory` hands out one `FakePeerConnection` per call and keeps a
//! `PeerProbe` for it, so tests can inspect what the negotiation engine did
//! and inject connection events.
//!
//! Scripted behavior:
//! - a session description whose SDP contains `"malformed"` is rejected
//! - a candidate whose string contains `"stale"` is rejected
//! - with `auto_connect`, a remote audio track is emitted as soon as both
//!   local and remote descriptions are set
//!
//! # Example
//!
//! ```rust,ignore
//! let peers = FakePeerFactory::auto_connecting();
//! // ... start a call ...
//! let probe = peers.probe(&call_id).unwrap();
//! assert_eq!(probe.remote_descriptions().len(), 1);
//! ```

use async_trait::async_trait;
use call_session::media::{LocalTrack, TrackInfo, TrackKind};
use call_session::negotiation::{PeerConnection, PeerConnectionFactory, PeerError, PeerEvent, PeerLink};
use call_session::signal::{IceCandidate, SessionDescription};
use common::types::CallId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const PEER_EVENT_BUFFER: usize = 32;

/// Everything a fake connection observed, in order.
#[derive(Debug, Default)]
struct ProbeState {
    operations: Vec<String>,
    attached_tracks: Vec<TrackInfo>,
    local_descriptions: Vec<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    applied_candidates: Vec<IceCandidate>,
    has_local: bool,
    has_remote: bool,
    remote_track_emitted: bool,
    offers_created: usize,
    rollbacks: usize,
    closed: bool,
}

/// Inspection and event-injection handle for one fake connection.
#[derive(Debug, Clone)]
pub struct PeerProbe {
    call_id: CallId,
    state: Arc<Mutex<ProbeState>>,
    events: mpsc::Sender<PeerEvent>,
}

impl PeerProbe {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Operation log, e.g. `["add_track:audio", "set_remote:offer", "candidate:c1"]`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn attached_tracks(&self) -> Vec<TrackInfo> {
        self.state.lock().unwrap().attached_tracks.clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.state.lock().unwrap().local_descriptions.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state.lock().unwrap().remote_descriptions.clone()
    }

    /// Candidates accepted by `add_ice_candidate`, in application order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .applied_candidates
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().unwrap().offers_created
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Simulate remote media arriving.
    pub async fn emit_remote_track(&self) {
        let track = TrackInfo {
            id: format!("remote-audio-{}", self.call_id),
            kind: TrackKind::Audio,
        };
        let _ = self.events.send(PeerEvent::RemoteTrack(track)).await;
    }

    /// Simulate a gathered local network candidate.
    pub async fn emit_local_candidate(&self, candidate: &str) {
        let _ = self
            .events
            .send(PeerEvent::LocalCandidate(IceCandidate::new(candidate).with_mid("0", 0)))
            .await;
    }

    /// Simulate an unrecoverable connection failure.
    pub async fn emit_failure(&self, reason: &str) {
        let _ = self
            .events
            .send(PeerEvent::ConnectionFailed(reason.to_string()))
            .await;
    }
}

/// Scripted `PeerConnection`.
pub struct FakePeerConnection {
    call_id: CallId,
    state: Arc<Mutex<ProbeState>>,
    events: mpsc::Sender<PeerEvent>,
    auto_connect: bool,
}

impl FakePeerConnection {
    fn record(&self, op: String) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn check_description(desc: &SessionDescription) -> Result<(), PeerError> {
        if desc.sdp.contains("malformed") {
            return Err(PeerError::InvalidDescription(
                "unparseable session description".to_string(),
            ));
        }
        Ok(())
    }

    fn maybe_connect(&self) {
        let emit = {
            let mut state = self.state.lock().unwrap();
            let ready = self.auto_connect
                && state.has_local
                && state.has_remote
                && !state.remote_track_emitted
                && !state.closed;
            if ready {
                state.remote_track_emitted = true;
            }
            ready
        };
        if emit {
            let track = TrackInfo {
                id: format!("remote-audio-{}", self.call_id),
                kind: TrackKind::Audio,
            };
            let _ = self.events.try_send(PeerEvent::RemoteTrack(track));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn add_track(&mut self, track: Arc<dyn LocalTrack>) -> Result<(), PeerError> {
        let info = track.info();
        self.record(format!("add_track:{}", info.kind.as_str()));
        self.state.lock().unwrap().attached_tracks.push(info);
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
        let n = {
            let mut state = self.state.lock().unwrap();
            state.offers_created += 1;
            state.offers_created
        };
        self.record("create_offer".to_string());
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {n} 2 IN IP4 127.0.0.1\r\ns=offer {}\r\n",
            self.call_id
        )))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        self.record("create_answer".to_string());
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=answer {}\r\n",
            self.call_id
        )))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        Self::check_description(&desc)?;
        self.record(format!("set_local:{}", desc.sdp_type.as_str()));
        {
            let mut state = self.state.lock().unwrap();
            state.local_descriptions.push(desc);
            state.has_local = true;
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        Self::check_description(&desc)?;
        self.record(format!("set_remote:{}", desc.sdp_type.as_str()));
        {
            let mut state = self.state.lock().unwrap();
            state.remote_descriptions.push(desc);
            state.has_remote = true;
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        if candidate.candidate.contains("stale") {
            self.record(format!("reject_candidate:{}", candidate.candidate));
            return Err(PeerError::Operation("candidate for unknown ufrag".to_string()));
        }
        self.record(format!("candidate:{}", candidate.candidate));
        self.state.lock().unwrap().applied_candidates.push(candidate);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), PeerError> {
        self.record("rollback".to_string());
        let mut state = self.state.lock().unwrap();
        state.rollbacks += 1;
        state.has_local = false;
        Ok(())
    }

    async fn close(&mut self) {
        self.record("close".to_string());
        self.state.lock().unwrap().closed = true;
    }
}

/// Factory that creates one `FakePeerConnection` (and probe) per call.
#[derive(Debug, Clone, Default)]
pub struct FakePeerFactory {
    probes: Arc<Mutex<HashMap<CallId, PeerProbe>>>,
    auto_connect: bool,
}

impl FakePeerFactory {
    /// Connections only report remote media when told to via the probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections report remote media once negotiation completes.
    pub fn auto_connecting() -> Self {
        Self {
            auto_connect: true,
            ..Self::default()
        }
    }

    /// Probe for the most recent connection created for `call_id`.
    pub fn probe(&self, call_id: &CallId) -> Option<PeerProbe> {
        self.probes.lock().unwrap().get(call_id).cloned()
    }

    pub fn connections_created(&self) -> usize {
        self.probes.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, call_id: &CallId) -> Result<PeerLink, PeerError> {
        let (tx, rx) = mpsc::channel(PEER_EVENT_BUFFER);
        let state = Arc::new(Mutex::new(ProbeState::default()));

        let probe = PeerProbe {
            call_id: call_id.clone(),
            state: Arc::clone(&state),
            events: tx.clone(),
        };
        self.probes.lock().unwrap().insert(call_id.clone(), probe);

        let connection = FakePeerConnection {
            call_id: call_id.clone(),
            state,
            events: tx,
            auto_connect: self.auto_connect,
        };
        Ok(PeerLink {
            connection: Box::new(connection),
            events: rx,
        })
    }
}
