//! Redis pub/sub signal relay.
//!
//! # Channels
//!
//! - `call:{call_id}:signals` - one channel per call; payload is the JSON wire
//!   envelope from [`crate::signal`]
//!
//! # Connection Pattern
//!
//! Publishing shares one `MultiplexedConnection`, cloned per operation (the
//! redis-rs connection is cheap to clone and safe to use concurrently).
//! Pub/sub needs a dedicated connection, so each subscription opens its own
//! and closes it when the subscription is dropped.

use super::{channel_name, SignalSubscription, SignalTransport, TransportError, SUBSCRIPTION_BUFFER};
use crate::observability::metrics;
use crate::signal::Signal;

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::CallId;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Signal transport backed by Redis pub/sub.
#[derive(Clone)]
pub struct RedisSignalTransport {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisSignalTransport {
    /// Open the client and the shared publishing connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Subscribe` if the URL is invalid or the relay
    /// is unreachable.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, TransportError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            // Do NOT log the URL; it may embed credentials.
            error!(target: "call.transport", error = %e, "Failed to open Redis client");
            TransportError::Subscribe(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "call.transport", error = %e, "Failed to connect to Redis");
                TransportError::Subscribe(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { client, connection })
    }
}

#[async_trait]
impl SignalTransport for RedisSignalTransport {
    #[instrument(skip_all, fields(call_id = %signal.call_id, signal_type = signal.kind().as_str()))]
    async fn publish(&self, signal: &Signal) -> Result<(), TransportError> {
        let payload = signal
            .encode()
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        let mut conn = self.connection.clone();
        let receivers: i64 = conn
            .publish(channel_name(&signal.call_id), payload)
            .await
            .map_err(|e| TransportError::Publish(format!("PUBLISH failed: {e}")))?;

        debug!(target: "call.transport", receivers = receivers, "Signal published");
        Ok(())
    }

    #[instrument(skip_all, fields(call_id = %call_id))]
    async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError> {
        let channel = channel_name(call_id);

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| TransportError::Subscribe(format!("pub/sub connection failed: {e}")))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| TransportError::Subscribe(format!("SUBSCRIBE failed: {e}")))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_call_id = call_id.clone();

        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    message = messages.next() => {
                        let Some(message) = message else {
                            warn!(
                                target: "call.transport",
                                call_id = %task_call_id,
                                "Relay closed the subscription"
                            );
                            break;
                        };
                        let payload: String = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(target: "call.transport", error = %e, "Non-text payload dropped");
                                metrics::record_signal_dropped("malformed");
                                continue;
                            }
                        };
                        match Signal::decode(&payload) {
                            Ok(signal) => {
                                if tx.send(signal).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    target: "call.transport",
                                    call_id = %task_call_id,
                                    error = %e,
                                    "Undecodable signal dropped"
                                );
                                metrics::record_signal_dropped("malformed");
                            }
                        }
                    }
                }
            }
            debug!(target: "call.transport", call_id = %task_call_id, "Subscription ended");
        });

        debug!(target: "call.transport", "Subscribed to call channel");
        Ok(SignalSubscription::new(call_id.clone(), rx, cancel))
    }
}
