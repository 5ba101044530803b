//! Observability for the call session core.
//!
//! # Privacy by Default
//!
//! Actor run loops use `#[instrument(skip_all)]` with explicit fields. SDP
//! bodies and candidate strings are never logged or used as labels; only
//! signal kinds, call ids and counts are.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `call_sessions_active` | Gauge | none | Live call sessions |
//! | `call_outcomes_total` | Counter | `outcome` | Terminal outcomes |
//! | `call_signals_total` | Counter | `direction`, `signal_type` | Signal traffic |
//! | `call_signals_dropped_total` | Counter | `reason` | Filtered or redundant inbound signals |
//! | `call_publish_attempts_total` | Counter | `status` | Transport retry behaviour |
//! | `call_setup_duration_seconds` | Histogram | none | Start to connected |
//! | `call_duration_seconds` | Histogram | none | Connected to ended |
//! | `call_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure |
//! | `call_actor_panics_total` | Counter | `actor_type` | Actor panics |

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_call_duration, record_call_outcome,
    record_publish_attempt, record_setup_duration, record_signal, record_signal_dropped,
    set_actor_mailbox_depth, set_sessions_active,
};
