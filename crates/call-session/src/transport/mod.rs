//! Signal transport adapter.
//!
//! Wraps the external message relay behind two operations: publish a signal
//! to a call channel, and subscribe to the signals on a call channel.
//!
//! Delivery contract assumed from every implementation:
//! - at-least-once, possibly duplicated
//! - fan-out to all current subscribers of the channel
//! - no ordering guarantee across messages
//! - fire-and-forget publish (no acknowledgement)
//!
//! # Implementations
//!
//! - [`InMemorySignalBus`]: in-process broadcast bus
//! - [`RedisSignalTransport`]: Redis pub/sub relay
//! - [`RetryingTransport`]: bounded-retry wrapper around either

pub mod memory;
pub mod redis;
pub mod retry;

pub use memory::InMemorySignalBus;
pub use redis::RedisSignalTransport;
pub use retry::{RetryPolicy, RetryingTransport};

use crate::signal::Signal;

use async_trait::async_trait;
use common::types::CallId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Buffer between a relay subscription task and its consumer.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// Relay channel name for a call.
#[must_use]
pub fn channel_name(call_id: &CallId) -> String {
    format!("call:{call_id}:signals")
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Transport closed")]
    Closed,
}

/// Publish/subscribe access to the signal relay.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Publish a signal on its call's channel.
    async fn publish(&self, signal: &Signal) -> Result<(), TransportError>;

    /// Subscribe to all signals on a call's channel.
    ///
    /// Signals published after this returns are delivered to the subscription.
    async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError>;
}

#[async_trait]
impl<T: SignalTransport + ?Sized> SignalTransport for Arc<T> {
    async fn publish(&self, signal: &Signal) -> Result<(), TransportError> {
        (**self).publish(signal).await
    }

    async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError> {
        (**self).subscribe(call_id).await
    }
}

/// A live subscription to one call channel.
///
/// Dropping the subscription cancels the task feeding it, which unsubscribes
/// from the relay.
#[derive(Debug)]
pub struct SignalSubscription {
    call_id: CallId,
    receiver: mpsc::Receiver<Signal>,
    _guard: DropGuard,
}

impl SignalSubscription {
    /// Wrap the receiving end of a feeder task. `cancel` stops the feeder.
    #[must_use]
    pub fn new(call_id: CallId, receiver: mpsc::Receiver<Signal>, cancel: CancellationToken) -> Self {
        Self {
            call_id,
            receiver,
            _guard: cancel.drop_guard(),
        }
    }

    /// Next signal in arrival order, or `None` once the relay side has closed.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.receiver.recv().await
    }

    #[must_use]
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }
}
