//! Call Signal Tap
//!
//! Operational tool that subscribes to one or more call channels on the Redis
//! relay and logs every decoded signal (kind, sender, receiver). Session
//! descriptions and candidates are never printed.
//!
//! ```text
//! CALL_REDIS_URL=redis://localhost:6379 call-signal-tap <call-id> [<call-id> ...]
//! ```
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to the relay (wrapped in bounded retry)
//! 4. Subscribe to each call channel
//! 5. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use call_session::config::{Config, ConfigError};
use call_session::observability::init_metrics_recorder;
use call_session::transport::{
    channel_name, RedisSignalTransport, RetryingTransport, SignalSubscription, SignalTransport,
};
use common::types::CallId;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for subscription tasks after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_session=debug,call_signal_tap=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting call signal tap");

    let call_ids: Vec<CallId> = std::env::args().skip(1).map(CallId::from).collect();
    if call_ids.is_empty() {
        error!("Usage: call-signal-tap <call-id> [<call-id> ...]");
        return Err("no call ids given".into());
    }

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    info!(config = ?config, "Configuration loaded");

    let redis_url = config
        .redis_url
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("CALL_REDIS_URL".to_string()))?;

    let _metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics recorder");
        e
    })?;

    let redis = RedisSignalTransport::connect(&redis_url).await.map_err(|e| {
        error!(error = %e, "Failed to connect to signal relay");
        e
    })?;
    let transport = RetryingTransport::new(Arc::new(redis), config.retry_policy());

    let shutdown_token = CancellationToken::new();
    let mut taps = JoinSet::new();

    for call_id in call_ids {
        let subscription = transport.subscribe(&call_id).await.map_err(|e| {
            error!(call_id = %call_id, error = %e, "Failed to subscribe");
            e
        })?;
        info!(channel = %channel_name(&call_id), "Tapping call channel");
        taps.spawn(tap(subscription, shutdown_token.child_token()));
    }

    shutdown_signal().await;
    info!("Shutdown signal received");
    shutdown_token.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while taps.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for subscriptions to close");
    }

    info!("Call signal tap stopped");
    Ok(())
}

/// Log every signal on one call channel until cancelled or the relay closes.
async fn tap(mut subscription: SignalSubscription, cancel: CancellationToken) {
    let call_id = subscription.call_id().clone();
    let mut seen: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            signal = subscription.recv() => {
                let Some(signal) = signal else {
                    warn!(call_id = %call_id, "Relay closed the subscription");
                    break;
                };
                seen += 1;
                info!(
                    call_id = %call_id,
                    signal_type = signal.kind().as_str(),
                    sender_id = %signal.sender_id,
                    receiver_id = %signal.receiver_id,
                    seq = seen,
                    "Signal"
                );
            }
        }
    }

    info!(call_id = %call_id, signals = seen, "Tap closed");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
