//! Common types shared across call-session crates.

#![warn(clippy::pedantic)]

/// Call and party identifiers
pub mod types;

/// Secret types that prevent accidental logging
pub mod secret;
