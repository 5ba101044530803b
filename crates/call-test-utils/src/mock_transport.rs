//! Recording transport with failure injection.
//!
//! Wraps an `InMemorySignalBus` (shared between parties so their sessions
//! actually talk), records every publish attempt, and can be told to fail
//! publishes or subscribes.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = InMemorySignalBus::new();
//! let transport = RecordingTransport::new(bus.clone());
//! transport.fail_next_publishes(2);
//! // ... place a call ...
//! assert_eq!(transport.published_of_kind(SignalKind::Offer).len(), 1);
//! ```

use async_trait::async_trait;
use call_session::signal::{Signal, SignalKind};
use call_session::transport::{InMemorySignalBus, SignalSubscription, SignalTransport, TransportError};
use common::types::CallId;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct RecordingState {
    published: Vec<Signal>,
    publish_attempts: usize,
    failing_publishes: usize,
    fail_all_publishes: bool,
    fail_subscribe: bool,
    subscriptions: Vec<CallId>,
}

/// A `SignalTransport` over a shared in-memory bus that records traffic.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    bus: InMemorySignalBus,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
    pub fn new(bus: InMemorySignalBus) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(RecordingState::default())),
        }
    }

    pub fn bus(&self) -> &InMemorySignalBus {
        &self.bus
    }

    /// Fail the next `n` publish attempts, then recover.
    pub fn fail_next_publishes(&self, n: usize) {
        self.state.lock().unwrap().failing_publishes = n;
    }

    /// Fail every publish until `recover()` is called.
    pub fn fail_all_publishes(&self) {
        self.state.lock().unwrap().fail_all_publishes = true;
    }

    pub fn fail_subscribe(&self) {
        self.state.lock().unwrap().fail_subscribe = true;
    }

    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_publishes = 0;
        state.fail_all_publishes = false;
        state.fail_subscribe = false;
    }

    /// Successfully published signals, in order.
    pub fn published(&self) -> Vec<Signal> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_of_kind(&self, kind: SignalKind) -> Vec<Signal> {
        self.published()
            .into_iter()
            .filter(|s| s.kind() == kind)
            .collect()
    }

    /// Publish attempts, including failed ones.
    pub fn publish_attempts(&self) -> usize {
        self.state.lock().unwrap().publish_attempts
    }

    pub fn subscriptions(&self) -> Vec<CallId> {
        self.state.lock().unwrap().subscriptions.clone()
    }
}

#[async_trait]
impl SignalTransport for RecordingTransport {
    async fn publish(&self, signal: &Signal) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            state.publish_attempts += 1;
            if state.fail_all_publishes {
                return Err(TransportError::Publish("relay unreachable".to_string()));
            }
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(TransportError::Publish("relay timeout".to_string()));
            }
            state.published.push(signal.clone());
        }
        self.bus.publish(signal).await
    }

    async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_subscribe {
                return Err(TransportError::Subscribe("relay unreachable".to_string()));
            }
            state.subscriptions.push(call_id.clone());
        }
        self.bus.subscribe(call_id).await
    }
}
