//! Metrics definitions for the call session core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `call_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 2 values (registry, session)
//! - `outcome`: bounded by `CallError::outcome_label` plus `ended`
//! - `signal_type`: 4 values (offer, answer, ice-candidate, end-call)
//! - `reason`: bounded drop reasons (7 values)
//! - `status`: success, retry, exhausted
//!
//! Call ids and party ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle for
/// rendering the exposition text.
///
/// Must be called before any metrics are recorded. Histogram buckets:
/// - call setup: sub-second to the ring timeout (120s)
/// - call duration: seconds to hours
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("call_setup_duration_seconds".to_string()),
            &[0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000, 60.000, 120.000],
        )
        .map_err(|e| format!("Failed to set call setup buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("call_duration_seconds".to_string()),
            &[
                10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0,
            ],
        )
        .map_err(|e| format!("Failed to set call duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session Metrics (Gauges)
// ============================================================================

/// Set the number of live (non-terminal) call sessions.
///
/// Metric: `call_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: u64) {
    // u64 to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_sessions_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `call_actor_mailbox_depth`
/// Labels: `actor_type` (registry, session)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Outcome & Duration Metrics
// ============================================================================

/// Record the terminal outcome of a call.
///
/// Metric: `call_outcomes_total`
/// Labels: `outcome` (ended, not_answered, media_denied, negotiation_failed,
/// connection_failed, transport_unavailable, invalid_state, internal)
pub fn record_call_outcome(outcome: &str) {
    counter!("call_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record time from `start` to `Connected`.
///
/// Metric: `call_setup_duration_seconds`
pub fn record_setup_duration(duration: Duration) {
    histogram!("call_setup_duration_seconds").record(duration.as_secs_f64());
}

/// Record time from `Connected` to `Ended`.
///
/// Metric: `call_duration_seconds`
pub fn record_call_duration(duration: Duration) {
    histogram!("call_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Signaling Metrics (Counters)
// ============================================================================

/// Record a signal crossing the transport boundary.
///
/// Metric: `call_signals_total`
/// Labels: `direction` (inbound, outbound), `signal_type`
///
/// Cardinality: 8 (2 directions x 4 signal types)
pub fn record_signal(direction: &str, signal_type: &str) {
    counter!("call_signals_total",
        "direction" => direction.to_string(),
        "signal_type" => signal_type.to_string()
    )
    .increment(1);
}

/// Record an inbound signal that was dropped without effect.
///
/// Metric: `call_signals_dropped_total`
/// Labels: `reason` (own_echo, foreign_call, unexpected_party, terminal,
/// duplicate, glare, not_started, malformed)
///
/// Duplicates are expected under at-least-once delivery; a sustained rise in
/// `foreign_call` or `unexpected_party` points at a routing bug.
pub fn record_signal_dropped(reason: &str) {
    counter!("call_signals_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a publish or subscribe attempt at the retry boundary.
///
/// Metric: `call_publish_attempts_total`
/// Labels: `status` (success, retry, exhausted)
pub fn record_publish_attempt(status: &str) {
    counter!("call_publish_attempts_total", "status" => status.to_string()).increment(1);
}

// ============================================================================
// Actor Health
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `call_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("call_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}
