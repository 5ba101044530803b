//! Call session error types.
//!
//! `CallError` is the single error surfaced to callers of the session API and
//! carried by `CallEvent::Failed`. Collaborator errors (media capture, peer
//! connection, transport) convert into it at the session boundary.
//!
//! Only `CallNotAnswered` and `MediaAcquisitionDenied` get their own
//! user-visible message; everything else collapses to a generic one.

use crate::config::ConfigError;
use crate::media::MediaError;
use crate::negotiation::PeerError;
use crate::signal::SignalCodecError;
use crate::transport::TransportError;

use thiserror::Error;

/// Call session error type.
///
/// Maps to user-visible messages:
/// - `CallNotAnswered`: "No answer"
/// - `MediaAcquisitionDenied`: camera/microphone permission prompt
/// - everything else: generic "Call failed"
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Local capture could not be obtained (permission denied or no device).
    #[error("Media acquisition denied: {0}")]
    MediaAcquisitionDenied(String),

    /// Ring timer elapsed before any remote media arrived.
    #[error("Call not answered")]
    CallNotAnswered,

    /// Operation not valid in the current session state (e.g. double start).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed or rejected session description.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The peer connection reported an unrecoverable network failure.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Publish/subscribe failed after bounded retry, or the relay dropped us.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No session registered for the call id.
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// Actor mailbox closed or response channel dropped.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Returns the user-facing message for this error (no internal details).
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::CallNotAnswered => "No answer",
            CallError::MediaAcquisitionDenied(_) => {
                "Allow camera and microphone access to place calls"
            }
            CallError::InvalidState(_)
            | CallError::NegotiationFailed(_)
            | CallError::ConnectionFailed(_)
            | CallError::TransportUnavailable(_)
            | CallError::CallNotFound(_)
            | CallError::Internal(_) => "Call failed",
        }
    }

    /// Whether this is an expected terminal outcome rather than a fault.
    ///
    /// Expected outcomes are logged at `info` and never shown as error toasts.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, CallError::CallNotAnswered)
    }

    /// Bounded label for the `call_outcomes_total` metric.
    #[must_use]
    pub fn outcome_label(&self) -> &'static str {
        match self {
            CallError::MediaAcquisitionDenied(_) => "media_denied",
            CallError::CallNotAnswered => "not_answered",
            CallError::InvalidState(_) => "invalid_state",
            CallError::NegotiationFailed(_) => "negotiation_failed",
            CallError::ConnectionFailed(_) => "connection_failed",
            CallError::TransportUnavailable(_) => "transport_unavailable",
            CallError::CallNotFound(_) | CallError::Internal(_) => "internal",
        }
    }
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        CallError::MediaAcquisitionDenied(err.to_string())
    }
}

impl From<PeerError> for CallError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::InvalidDescription(_) | PeerError::Operation(_) => {
                CallError::NegotiationFailed(err.to_string())
            }
            PeerError::Closed => CallError::ConnectionFailed(err.to_string()),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::TransportUnavailable(err.to_string())
    }
}

impl From<SignalCodecError> for CallError {
    fn from(err: SignalCodecError) -> Self {
        CallError::NegotiationFailed(err.to_string())
    }
}

impl From<ConfigError> for CallError {
    fn from(err: ConfigError) -> Self {
        CallError::Internal(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_errors_convert() {
        assert!(matches!(
            CallError::from(MediaError::PermissionDenied("camera".to_string())),
            CallError::MediaAcquisitionDenied(_)
        ));
        assert!(matches!(
            CallError::from(MediaError::DeviceUnavailable("no camera".to_string())),
            CallError::MediaAcquisitionDenied(_)
        ));
        assert!(matches!(
            CallError::from(PeerError::InvalidDescription("bad sdp".to_string())),
            CallError::NegotiationFailed(_)
        ));
        assert!(matches!(
            CallError::from(PeerError::Closed),
            CallError::ConnectionFailed(_)
        ));
        assert!(matches!(
            CallError::from(TransportError::Publish("refused".to_string())),
            CallError::TransportUnavailable(_)
        ));
        assert!(matches!(
            CallError::from(SignalCodecError::Malformed("x".to_string())),
            CallError::NegotiationFailed(_)
        ));
    }

    #[test]
    fn test_user_messages_are_distinct_for_expected_outcomes() {
        let not_answered = CallError::CallNotAnswered.user_message();
        let denied = CallError::MediaAcquisitionDenied("camera".to_string()).user_message();

        assert_ne!(not_answered, denied);
        assert_ne!(not_answered, "Call failed");
        assert_ne!(denied, "Call failed");
    }

    #[test]
    fn test_user_messages_hide_internal_details() {
        let err = CallError::TransportUnavailable("redis://10.0.0.7:6379 refused".to_string());
        assert_eq!(err.user_message(), "Call failed");

        let err = CallError::NegotiationFailed("m=audio line missing".to_string());
        assert!(!err.user_message().contains("m=audio"));
    }

    #[test]
    fn test_only_not_answered_is_expected() {
        assert!(CallError::CallNotAnswered.is_expected());
        assert!(!CallError::MediaAcquisitionDenied("mic".to_string()).is_expected());
        assert!(!CallError::ConnectionFailed("ice".to_string()).is_expected());
        assert!(!CallError::InvalidState("double start".to_string()).is_expected());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CallError::CallNotAnswered.outcome_label(), "not_answered");
        assert_eq!(
            CallError::MediaAcquisitionDenied(String::new()).outcome_label(),
            "media_denied"
        );
        assert_eq!(
            CallError::TransportUnavailable(String::new()).outcome_label(),
            "transport_unavailable"
        );
        assert_eq!(CallError::Internal(String::new()).outcome_label(), "internal");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", CallError::InvalidState("call already started".to_string())),
            "Invalid state: call already started"
        );
        assert_eq!(format!("{}", CallError::CallNotAnswered), "Call not answered");
    }
}
