//! Test fixtures for call flows.
//!
//! Provides pre-configured parties, descriptions and candidates.

use crate::mock_media::FakeMediaCapture;
use crate::mock_peer::FakePeerFactory;
use crate::mock_transport::RecordingTransport;

use call_session::actors::{ActorMetrics, CallDependencies, CallRegistryHandle};
use call_session::config::Config;
use call_session::profile::{PartyProfile, StaticProfileDirectory};
use call_session::signal::{IceCandidate, SessionDescription, Signal};
use call_session::transport::InMemorySignalBus;
use common::types::{CallId, PartyId};
use std::collections::HashMap;
use std::sync::Arc;

pub fn alice() -> PartyId {
    PartyId::from("alice")
}

pub fn bob() -> PartyId {
    PartyId::from("bob")
}

pub fn mallory() -> PartyId {
    PartyId::from("mallory")
}

pub fn test_call_id() -> CallId {
    CallId::from("call-test-1")
}

pub fn offer_sdp() -> SessionDescription {
    SessionDescription::offer("v=0\r\no=- 42 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n")
}

pub fn answer_sdp() -> SessionDescription {
    SessionDescription::answer("v=0\r\no=- 43 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n")
}

pub fn malformed_offer() -> SessionDescription {
    SessionDescription::offer("malformed")
}

pub fn candidate(label: &str) -> IceCandidate {
    IceCandidate::new(label).with_mid("0", 0)
}

/// Offer from `from` to `to` on `call_id`.
pub fn remote_offer(call_id: &CallId, from: &PartyId, to: &PartyId) -> Signal {
    Signal::offer(call_id.clone(), from.clone(), to.clone(), offer_sdp())
}

pub fn remote_answer(call_id: &CallId, from: &PartyId, to: &PartyId) -> Signal {
    Signal::answer(call_id.clone(), from.clone(), to.clone(), answer_sdp())
}

pub fn remote_candidate(call_id: &CallId, from: &PartyId, to: &PartyId, label: &str) -> Signal {
    Signal::ice_candidate(call_id.clone(), from.clone(), to.clone(), candidate(label))
}

pub fn remote_end_call(call_id: &CallId, from: &PartyId, to: &PartyId) -> Signal {
    Signal::end_call(call_id.clone(), from.clone(), to.clone())
}

/// Defaults, with the given overrides applied through `from_vars`.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = overrides
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_vars(&vars).expect("test config should be valid")
}

/// Config with a single publish attempt, so transport failures surface at once.
pub fn no_retry_config() -> Config {
    test_config(&[("CALL_PUBLISH_MAX_ATTEMPTS", "1")])
}

pub fn profiles() -> StaticProfileDirectory {
    StaticProfileDirectory::from_profiles([
        PartyProfile::new(alice(), "Alice"),
        PartyProfile::new(bob(), "Bob"),
    ])
}

/// One side of a call: a registry plus the fakes behind it.
pub struct TestParty {
    pub party_id: PartyId,
    pub registry: CallRegistryHandle,
    pub capture: FakeMediaCapture,
    pub peers: FakePeerFactory,
    pub transport: RecordingTransport,
    pub metrics: Arc<ActorMetrics>,
}

impl TestParty {
    /// Party on `bus` with default config and auto-connecting peers.
    pub fn new(party_id: PartyId, bus: &InMemorySignalBus) -> Self {
        TestPartyBuilder::new(party_id, bus).build()
    }

    pub fn builder(party_id: PartyId, bus: &InMemorySignalBus) -> TestPartyBuilder {
        TestPartyBuilder::new(party_id, bus)
    }
}

/// Builder for `TestParty`.
pub struct TestPartyBuilder {
    party_id: PartyId,
    bus: InMemorySignalBus,
    config: Config,
    capture: FakeMediaCapture,
    peers: FakePeerFactory,
}

impl TestPartyBuilder {
    pub fn new(party_id: PartyId, bus: &InMemorySignalBus) -> Self {
        Self {
            party_id,
            bus: bus.clone(),
            config: Config::default(),
            capture: FakeMediaCapture::new(),
            peers: FakePeerFactory::auto_connecting(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn capture(mut self, capture: FakeMediaCapture) -> Self {
        self.capture = capture;
        self
    }

    /// Peers that only connect when told to through their probe.
    pub fn manual_peers(mut self) -> Self {
        self.peers = FakePeerFactory::new();
        self
    }

    pub fn build(self) -> TestParty {
        let transport = RecordingTransport::new(self.bus);
        let metrics = ActorMetrics::new();
        let deps = CallDependencies::new(
            Arc::new(self.capture.clone()),
            Arc::new(self.peers.clone()),
            Arc::new(transport.clone()),
        )
        .with_profiles(Arc::new(profiles()));
        let registry =
            CallRegistryHandle::new(self.party_id.clone(), &self.config, deps, Arc::clone(&metrics));

        TestParty {
            party_id: self.party_id,
            registry,
            capture: self.capture,
            peers: self.peers,
            transport,
            metrics,
        }
    }
}
