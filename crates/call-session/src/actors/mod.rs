//! Actor model for call sessions.
//!
//! ```text
//! CallRegistryActor (singleton per process)
//! └── supervises N CallSessionActors
//!     └── CallSessionActor (one per call_id)
//!         ├── owns LocalMediaController (capture tracks)
//!         ├── owns NegotiationEngine (peer connection + candidate buffer)
//!         └── owns SignalSubscription (call channel)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Session outlives any UI**: the registry owns sessions; views only hold handles
//! - **CancellationToken propagation**: registry passes child tokens, cancellation hangs up
//! - **One mailbox per session**: signals, peer events and timers never race each other
//! - **Mailbox monitoring**: depth thresholds with metrics (Registry: 100/500, Session: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `CallRegistryActor` singleton keyed by call id
//! - [`session`] - `CallSessionActor` per call, the lifecycle state machine
//! - [`messages`] - Message types, call states and events
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{CallRegistryActor, CallRegistryHandle, CALL_HISTORY_LIMIT};
pub use session::{CallDependencies, CallSessionActor, CallSessionHandle, SessionParams};
