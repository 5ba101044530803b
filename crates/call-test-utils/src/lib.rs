//! # Call Test Utilities
//!
//! Shared test utilities for the call session manager.
//!
//! Fakes for every collaborator a `CallSessionActor` talks to, so call flows
//! run entirely in-process and under paused tokio time.
//!
//! ## Modules
//!
//! - `mock_media` - Fake capture device with per-track stop counters
//! - `mock_peer` - Fake peer connections with an inspectable probe per call
//! - `mock_transport` - Recording transport with failure injection
//! - `fixtures` - Party ids, descriptions, candidates and configs
//! - `wait` - Helpers that await session states and events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let party = TestParty::new(alice(), &bus);
//!     let handle = party.registry.place_call(bob()).await.unwrap();
//!     wait_for_state(&handle, CallState::Negotiating).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_peer;
pub mod mock_transport;
pub mod wait;

pub use fixtures::*;
pub use mock_media::*;
pub use mock_peer::*;
pub use mock_transport::*;
pub use wait::*;
