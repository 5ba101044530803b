//! Message types for actor communication.
//!
//! All communication with the registry and session actors is strongly-typed
//! message passing via `tokio::sync::mpsc`, with `tokio::sync::oneshot` for
//! request-reply.

use super::session::CallSessionHandle;
use crate::errors::CallError;
use crate::media::TrackInfo;
use crate::signal::Signal;

use chrono::{DateTime, Utc};
use common::types::{CallId, PartyId};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Messages sent to `CallRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create (but do not start) a session for a call.
    CreateCall {
        call_id: CallId,
        remote_party_id: PartyId,
        role: CallRole,
        respond_to: oneshot::Sender<Result<CallSessionHandle, CallError>>,
    },

    /// Look up the live session for a call.
    GetCall {
        call_id: CallId,
        respond_to: oneshot::Sender<Result<CallSessionHandle, CallError>>,
    },

    /// Registry status (for diagnostics).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Summaries of recently finished calls, oldest first.
    RecentCalls {
        respond_to: oneshot::Sender<Vec<CallSummary>>,
    },

    /// Hang up every call and stop.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
}

/// Messages sent to `CallSessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Acquire media, subscribe to the call channel and start ringing.
    Start {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Local hangup. Always completes.
    Hangup { respond_to: oneshot::Sender<()> },

    ToggleMute {
        respond_to: oneshot::Sender<Result<bool, CallError>>,
    },

    ToggleVideo {
        respond_to: oneshot::Sender<Result<bool, CallError>>,
    },

    /// A signal delivered from outside the session's own subscription.
    RemoteSignal { signal: Signal },

    GetInfo {
        respond_to: oneshot::Sender<CallInfo>,
    },
}

/// Which side originates the offer. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Receiver,
}

impl CallRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallRole::Caller => "caller",
            CallRole::Receiver => "receiver",
        }
    }
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call session state.
///
/// Transitions only move forward in declaration order, except that `Failed`
/// is reachable from any non-terminal state. `Ended` and `Failed` are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    AwaitingMedia,
    Ringing,
    Negotiating,
    Connected,
    Ending,
    Ended,
    Failed,
}

impl CallState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::AwaitingMedia => "awaiting_media",
            CallState::Ringing => "ringing",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::Ending => "ending",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }

    /// Position in the forward order.
    #[must_use]
    pub const fn ordinal(&self) -> u8 {
        match self {
            CallState::Idle => 0,
            CallState::AwaitingMedia => 1,
            CallState::Ringing => 2,
            CallState::Negotiating => 3,
            CallState::Connected => 4,
            CallState::Ending => 5,
            CallState::Ended => 6,
            CallState::Failed => 7,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// States in which the session holds local tracks.
    #[must_use]
    pub const fn has_local_media(&self) -> bool {
        matches!(
            self,
            CallState::AwaitingMedia
                | CallState::Ringing
                | CallState::Negotiating
                | CallState::Connected
                | CallState::Ending
        )
    }

    /// Whether `next` is a legal transition from this state.
    #[must_use]
    pub fn can_transition_to(&self, next: CallState) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        next == CallState::Failed || next.ordinal() > self.ordinal()
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who ended a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedBy {
    Local,
    Remote,
}

/// Events published to the rendering surface and other observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Ringing,
    LocalTrackReady(TrackInfo),
    RemoteTrackReady(TrackInfo),
    Connected,
    Ended { ended_by: EndedBy },
    Failed(CallError),
}

/// One accepted state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub state: CallState,
    pub at: DateTime<Utc>,
}

/// Point-in-time session state, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: CallState,
    pub connected_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    pub failure: Option<CallError>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            connected_at: None,
            ended_at: None,
            failure: None,
        }
    }
}

impl SessionSnapshot {
    /// Call duration as of `now`.
    ///
    /// Running while `Connected`/`Ending`, frozen once `Ended`, zero
    /// otherwise (including `Failed`).
    #[must_use]
    pub fn duration_at(&self, now: Instant) -> Duration {
        match (self.state, self.connected_at) {
            (CallState::Connected | CallState::Ending, Some(start)) => {
                now.saturating_duration_since(start)
            }
            (CallState::Ended, Some(start)) => self
                .ended_at
                .map(|end| end.saturating_duration_since(start))
                .unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

/// Diagnostic view of a session.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: CallId,
    pub local_party_id: PartyId,
    pub remote_party_id: PartyId,
    pub role: CallRole,
    pub state: CallState,
    pub duration: Duration,
    pub failure: Option<CallError>,
    /// Whether local tracks are currently held.
    pub local_media: bool,
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
    pub remote_tracks: usize,
    pub pending_candidates: usize,
    pub created_at: DateTime<Utc>,
    pub state_history: Vec<StateChange>,
}

/// Registry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    /// Sessions currently held (not yet reaped).
    pub call_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
    pub finished_calls: usize,
}

/// Record of a finished call kept by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub call_id: CallId,
    pub remote_party_id: PartyId,
    pub role: CallRole,
    pub final_state: CallState,
    pub failure: Option<CallError>,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        assert!(CallState::Idle.can_transition_to(CallState::AwaitingMedia));
        assert!(CallState::Ringing.can_transition_to(CallState::Negotiating));
        assert!(CallState::Ringing.can_transition_to(CallState::Ending));
        assert!(!CallState::Connected.can_transition_to(CallState::Negotiating));
        assert!(!CallState::Negotiating.can_transition_to(CallState::Negotiating));
    }

    #[test]
    fn test_failed_reachable_from_any_live_state() {
        for state in [
            CallState::Idle,
            CallState::AwaitingMedia,
            CallState::Ringing,
            CallState::Negotiating,
            CallState::Connected,
            CallState::Ending,
        ] {
            assert!(state.can_transition_to(CallState::Failed), "{state}");
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [CallState::Ended, CallState::Failed] {
            assert!(terminal.is_terminal());
            for next in [CallState::Idle, CallState::Connected, CallState::Ended, CallState::Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_local_media_states() {
        assert!(!CallState::Idle.has_local_media());
        assert!(CallState::AwaitingMedia.has_local_media());
        assert!(CallState::Ending.has_local_media());
        assert!(!CallState::Ended.has_local_media());
        assert!(!CallState::Failed.has_local_media());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_duration_rules() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;
        let now = Instant::now();

        let mut snapshot = SessionSnapshot {
            state: CallState::Connected,
            connected_at: Some(start),
            ..SessionSnapshot::default()
        };
        assert_eq!(snapshot.duration_at(now), Duration::from_secs(5));

        snapshot.state = CallState::Ended;
        snapshot.ended_at = Some(start + Duration::from_secs(3));
        assert_eq!(
            snapshot.duration_at(now + Duration::from_secs(60)),
            Duration::from_secs(3)
        );

        snapshot.state = CallState::Failed;
        assert_eq!(snapshot.duration_at(now), Duration::ZERO);

        assert_eq!(SessionSnapshot::default().duration_at(now), Duration::ZERO);
    }
}
