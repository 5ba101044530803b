//! In-process signal bus.
//!
//! One `tokio::sync::broadcast` channel per call channel name. Publishing to a
//! channel nobody listens on succeeds and delivers nothing, matching the
//! relay's fire-and-forget semantics.

use super::{channel_name, SignalSubscription, SignalTransport, TransportError, SUBSCRIPTION_BUFFER};
use crate::signal::Signal;

use async_trait::async_trait;
use common::types::CallId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-channel broadcast capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// In-memory signal relay.
///
/// Cheaply cloneable; clones share the same channels, so two registries given
/// clones of one bus can call each other.
#[derive(Clone)]
pub struct InMemorySignalBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    channels: Mutex<HashMap<String, broadcast::Sender<Signal>>>,
    capacity: usize,
}

impl fmt::Debug for InMemorySignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySignalBus")
            .field("channels", &self.channels().len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl Default for InMemorySignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySignalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus whose channels buffer at most `capacity` undelivered signals per
    /// subscriber before the slowest subscriber starts losing them.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Number of live subscriptions on a call channel.
    #[must_use]
    pub fn subscriber_count(&self, call_id: &CallId) -> usize {
        self.channels()
            .get(&channel_name(call_id))
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop a channel, closing every subscription on it.
    ///
    /// Simulates the relay losing the subscriber connections.
    pub fn close_channel(&self, call_id: &CallId) {
        let removed = self.channels().remove(&channel_name(call_id));
        if removed.is_some() {
            debug!(target: "call.transport", call_id = %call_id, "Channel closed");
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Signal>>> {
        // The map holds no invariants a panicking holder could break.
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SignalTransport for InMemorySignalBus {
    async fn publish(&self, signal: &Signal) -> Result<(), TransportError> {
        let channel = channel_name(&signal.call_id);
        let mut channels = self.channels();

        let Some(sender) = channels.get(&channel) else {
            debug!(
                target: "call.transport",
                call_id = %signal.call_id,
                signal_type = signal.kind().as_str(),
                "No subscribers, signal not delivered"
            );
            return Ok(());
        };

        if sender.send(signal.clone()).is_err() {
            // Every receiver is gone; forget the channel.
            channels.remove(&channel);
        }
        Ok(())
    }

    async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError> {
        let mut broadcast_rx = {
            let mut channels = self.channels();
            channels
                .entry(channel_name(call_id))
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .subscribe()
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_call_id = call_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    received = broadcast_rx.recv() => match received {
                        Ok(signal) => {
                            if tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                target: "call.transport",
                                call_id = %task_call_id,
                                skipped = skipped,
                                "Subscriber lagged, signals lost"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(target: "call.transport", call_id = %task_call_id, "Subscription ended");
        });

        Ok(SignalSubscription::new(call_id.clone(), rx, cancel))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signal::{IceCandidate, SessionDescription, SignalKind};
    use common::types::PartyId;

    fn offer(call_id: &str) -> Signal {
        Signal::offer(
            CallId::from(call_id),
            PartyId::from("alice"),
            PartyId::from("bob"),
            SessionDescription::offer("v=0"),
        )
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemorySignalBus::new();
        assert!(bus.publish(&offer("call-1")).await.is_ok());
        assert_eq!(bus.subscriber_count(&CallId::from("call-1")), 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bus = InMemorySignalBus::new();
        let call_id = CallId::from("call-1");
        let mut first = bus.subscribe(&call_id).await.unwrap();
        let mut second = bus.subscribe(&call_id).await.unwrap();
        assert_eq!(bus.subscriber_count(&call_id), 2);

        bus.publish(&offer("call-1")).await.unwrap();

        assert_eq!(first.recv().await.unwrap().kind(), SignalKind::Offer);
        assert_eq!(second.recv().await.unwrap().kind(), SignalKind::Offer);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InMemorySignalBus::new();
        let mut other = bus.subscribe(&CallId::from("call-2")).await.unwrap();
        let mut mine = bus.subscribe(&CallId::from("call-1")).await.unwrap();

        bus.publish(&offer("call-1")).await.unwrap();
        let candidate = Signal::ice_candidate(
            CallId::from("call-2"),
            PartyId::from("alice"),
            PartyId::from("bob"),
            IceCandidate::new("candidate:1"),
        );
        bus.publish(&candidate).await.unwrap();

        assert_eq!(mine.recv().await.unwrap().call_id.as_str(), "call-1");
        assert_eq!(other.recv().await.unwrap().kind(), SignalKind::IceCandidate);
    }

    #[tokio::test]
    async fn test_dropped_subscription_unsubscribes() {
        let bus = InMemorySignalBus::new();
        let call_id = CallId::from("call-1");
        let subscription = bus.subscribe(&call_id).await.unwrap();
        drop(subscription);

        // The feeder task notices the cancellation and drops its receiver.
        for _ in 0..10 {
            if bus.subscriber_count(&call_id) == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.subscriber_count(&call_id), 0);
        assert!(bus.publish(&offer("call-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_channel_ends_subscriptions() {
        let bus = InMemorySignalBus::new();
        let call_id = CallId::from("call-1");
        let mut subscription = bus.subscribe(&call_id).await.unwrap();

        bus.close_channel(&call_id);

        assert!(subscription.recv().await.is_none());
    }
}
