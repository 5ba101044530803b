//! Call Session Library
//!
//! Peer-to-peer audio/video call session manager. Drives a one-to-one call
//! through signaling, negotiation and teardown:
//!
//! - Signal exchange over a pub/sub relay keyed by call id
//! - Offer/answer negotiation with buffered early ICE candidates
//! - Ring timeout, hangup and failure handling with guaranteed media release
//! - Local mute and camera toggles
//!
//! Media transport itself (the peer connection and capture devices) is
//! supplied by the embedder through the `PeerConnectionFactory` and
//! `MediaCapture` traits.
//!
//! # Architecture
//!
//! ```text
//! CallRegistryHandle ──▶ CallRegistryActor
//!                          └── CallSessionActor (per call)
//!                               ├── LocalMediaController ──▶ MediaCapture
//!                               ├── NegotiationEngine ────▶ PeerConnection
//!                               │    └── CandidateBuffer
//!                               └── SignalSubscription ───▶ SignalTransport (memory | redis, with retry)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry and per-call session actors
//! - [`config`] - Configuration from environment
//! - [`errors`] - `CallError` and user-visible messages
//! - [`media`] - Local media controller and capture interface
//! - [`negotiation`] - Negotiation engine and candidate buffer
//! - [`observability`] - Prometheus metrics
//! - [`profile`] - Party profile lookup
//! - [`signal`] - Signal model and wire codec
//! - [`transport`] - Signal transport adapters

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod negotiation;
pub mod observability;
pub mod profile;
pub mod signal;
pub mod transport;
