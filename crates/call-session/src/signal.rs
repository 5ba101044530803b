//! Signals exchanged between the two peers of a call.
//!
//! In memory a [`Signal`] carries a typed [`SignalPayload`]. On the relay it is
//! the flat JSON envelope
//!
//! ```text
//! { call_id, sender_id, receiver_id,
//!   signal_type: "offer" | "answer" | "ice-candidate" | "end-call",
//!   signal_data: { type, sdp } | { candidate: {..} } | {} }
//! ```
//!
//! Unknown `signal_type` values decode to [`SignalCodecError::UnknownType`]
//! so receivers can drop them without failing the call.

use common::types::{CallId, PartyId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Session description type as carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// A session description (`{type, sdp}`), the Offer/Answer payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A single trickled network candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the candidate line set.
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    #[must_use]
    pub fn with_mid(mut self, mid: impl Into<String>, m_line_index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_m_line_index = Some(m_line_index);
        self
    }
}

/// Discriminant of a signal, used for routing, logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    EndCall,
}

impl SignalKind {
    /// Wire name of the kind (`signal_type`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::EndCall => "end-call",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific signal data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    EndCall,
}

/// An immutable message exchanged over the signal transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub call_id: CallId,
    pub sender_id: PartyId,
    pub receiver_id: PartyId,
    pub payload: SignalPayload,
}

impl Signal {
    #[must_use]
    pub fn new(
        call_id: CallId,
        sender_id: PartyId,
        receiver_id: PartyId,
        payload: SignalPayload,
    ) -> Self {
        Self {
            call_id,
            sender_id,
            receiver_id,
            payload,
        }
    }

    #[must_use]
    pub fn offer(
        call_id: CallId,
        sender_id: PartyId,
        receiver_id: PartyId,
        description: SessionDescription,
    ) -> Self {
        Self::new(call_id, sender_id, receiver_id, SignalPayload::Offer(description))
    }

    #[must_use]
    pub fn answer(
        call_id: CallId,
        sender_id: PartyId,
        receiver_id: PartyId,
        description: SessionDescription,
    ) -> Self {
        Self::new(call_id, sender_id, receiver_id, SignalPayload::Answer(description))
    }

    #[must_use]
    pub fn ice_candidate(
        call_id: CallId,
        sender_id: PartyId,
        receiver_id: PartyId,
        candidate: IceCandidate,
    ) -> Self {
        Self::new(
            call_id,
            sender_id,
            receiver_id,
            SignalPayload::IceCandidate(candidate),
        )
    }

    #[must_use]
    pub fn end_call(call_id: CallId, sender_id: PartyId, receiver_id: PartyId) -> Self {
        Self::new(call_id, sender_id, receiver_id, SignalPayload::EndCall)
    }

    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self.payload {
            SignalPayload::Offer(_) => SignalKind::Offer,
            SignalPayload::Answer(_) => SignalKind::Answer,
            SignalPayload::IceCandidate(_) => SignalKind::IceCandidate,
            SignalPayload::EndCall => SignalKind::EndCall,
        }
    }

    /// Convert to the flat wire envelope.
    ///
    /// # Errors
    ///
    /// Returns `SignalCodecError::Serialize` if the payload cannot be
    /// represented as JSON.
    pub fn to_wire(&self) -> Result<WireSignal, SignalCodecError> {
        let signal_data = match &self.payload {
            SignalPayload::Offer(desc) | SignalPayload::Answer(desc) => serde_json::to_value(desc),
            SignalPayload::IceCandidate(candidate) => serde_json::to_value(CandidateData {
                candidate: candidate.clone(),
            }),
            SignalPayload::EndCall => Ok(serde_json::Value::Object(serde_json::Map::new())),
        }
        .map_err(|e| SignalCodecError::Serialize(e.to_string()))?;

        Ok(WireSignal {
            call_id: self.call_id.clone(),
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            signal_type: self.kind().as_str().to_string(),
            signal_data,
        })
    }

    /// Parse the flat wire envelope into a typed signal.
    ///
    /// # Errors
    ///
    /// - `UnknownType` if `signal_type` is not one of the four known kinds
    /// - `Malformed` if `signal_data` does not match the kind
    pub fn from_wire(wire: WireSignal) -> Result<Self, SignalCodecError> {
        let payload = match wire.signal_type.as_str() {
            "offer" => SignalPayload::Offer(parse_description(wire.signal_data, SdpType::Offer)?),
            "answer" => {
                SignalPayload::Answer(parse_description(wire.signal_data, SdpType::Answer)?)
            }
            "ice-candidate" => {
                let data: CandidateData = serde_json::from_value(wire.signal_data)
                    .map_err(|e| SignalCodecError::Malformed(format!("ice-candidate data: {e}")))?;
                SignalPayload::IceCandidate(data.candidate)
            }
            "end-call" => SignalPayload::EndCall,
            other => return Err(SignalCodecError::UnknownType(other.to_string())),
        };

        Ok(Self {
            call_id: wire.call_id,
            sender_id: wire.sender_id,
            receiver_id: wire.receiver_id,
            payload,
        })
    }

    /// Encode to the JSON text published on the relay.
    ///
    /// # Errors
    ///
    /// Returns `SignalCodecError::Serialize` on serialization failure.
    pub fn encode(&self) -> Result<String, SignalCodecError> {
        let wire = self.to_wire()?;
        serde_json::to_string(&wire).map_err(|e| SignalCodecError::Serialize(e.to_string()))
    }

    /// Decode JSON text received from the relay.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for invalid JSON or missing envelope fields and
    /// `UnknownType` for an unrecognised `signal_type`.
    pub fn decode(raw: &str) -> Result<Self, SignalCodecError> {
        let wire: WireSignal = serde_json::from_str(raw)
            .map_err(|e| SignalCodecError::Malformed(format!("envelope: {e}")))?;
        Self::from_wire(wire)
    }
}

/// The flat JSON envelope exchanged over the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSignal {
    pub call_id: CallId,
    pub sender_id: PartyId,
    pub receiver_id: PartyId,
    pub signal_type: String,
    #[serde(default)]
    pub signal_data: serde_json::Value,
}

/// `{candidate: {...}}` as carried in ice-candidate `signal_data`.
#[derive(Debug, Serialize, Deserialize)]
struct CandidateData {
    candidate: IceCandidate,
}

fn parse_description(
    data: serde_json::Value,
    expected: SdpType,
) -> Result<SessionDescription, SignalCodecError> {
    let desc: SessionDescription = serde_json::from_value(data)
        .map_err(|e| SignalCodecError::Malformed(format!("session description: {e}")))?;
    if desc.sdp_type != expected {
        return Err(SignalCodecError::Malformed(format!(
            "description type {:?} does not match signal type {expected:?}",
            desc.sdp_type
        )));
    }
    Ok(desc)
}

/// Signal codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalCodecError {
    #[error("Malformed signal: {0}")]
    Malformed(String),

    #[error("Unknown signal type: {0}")]
    UnknownType(String),

    #[error("Signal serialization failed: {0}")]
    Serialize(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (CallId, PartyId, PartyId) {
        (
            CallId::from("call-1"),
            PartyId::from("alice"),
            PartyId::from("bob"),
        )
    }

    #[test]
    fn test_offer_wire_shape() {
        let (call_id, alice, bob) = ids();
        let signal = Signal::offer(call_id, alice, bob, SessionDescription::offer("v=0 offer"));

        let value: serde_json::Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();

        assert_eq!(value["call_id"], "call-1");
        assert_eq!(value["sender_id"], "alice");
        assert_eq!(value["receiver_id"], "bob");
        assert_eq!(value["signal_type"], "offer");
        assert_eq!(value["signal_data"], json!({"type": "offer", "sdp": "v=0 offer"}));
    }

    #[test]
    fn test_candidate_wire_shape_omits_absent_fields() {
        let (call_id, alice, bob) = ids();
        let candidate = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host")
            .with_mid("0", 0);
        let signal = Signal::ice_candidate(call_id, alice, bob, candidate);

        let wire = signal.to_wire().unwrap();

        assert_eq!(wire.signal_type, "ice-candidate");
        assert_eq!(
            wire.signal_data,
            json!({"candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }})
        );
    }

    #[test]
    fn test_end_call_has_empty_object() {
        let (call_id, alice, bob) = ids();
        let wire = Signal::end_call(call_id, alice, bob).to_wire().unwrap();
        assert_eq!(wire.signal_type, "end-call");
        assert_eq!(wire.signal_data, json!({}));
    }

    #[test]
    fn test_decode_answer_from_foreign_client() {
        let raw = r#"{
            "call_id": "call-9",
            "sender_id": "bob",
            "receiver_id": "alice",
            "signal_type": "answer",
            "signal_data": {"type": "answer", "sdp": "v=0 answer"}
        }"#;

        let signal = Signal::decode(raw).unwrap();

        assert_eq!(signal.kind(), SignalKind::Answer);
        assert_eq!(signal.call_id.as_str(), "call-9");
        assert_eq!(
            signal.payload,
            SignalPayload::Answer(SessionDescription::answer("v=0 answer"))
        );
    }

    #[test]
    fn test_decode_end_call_accepts_missing_or_arbitrary_data() {
        let raw = r#"{"call_id":"c","sender_id":"a","receiver_id":"b","signal_type":"end-call"}"#;
        assert_eq!(Signal::decode(raw).unwrap().kind(), SignalKind::EndCall);

        let raw = r#"{"call_id":"c","sender_id":"a","receiver_id":"b","signal_type":"end-call","signal_data":{"reason":"busy"}}"#;
        assert_eq!(Signal::decode(raw).unwrap().kind(), SignalKind::EndCall);
    }

    #[test]
    fn test_decode_unknown_type() {
        let raw = r#"{"call_id":"c","sender_id":"a","receiver_id":"b","signal_type":"renegotiate","signal_data":{}}"#;
        assert_eq!(
            Signal::decode(raw),
            Err(SignalCodecError::UnknownType("renegotiate".to_string()))
        );
    }

    #[test]
    fn test_decode_mismatched_description_type_is_malformed() {
        let raw = r#"{"call_id":"c","sender_id":"a","receiver_id":"b","signal_type":"offer","signal_data":{"type":"answer","sdp":"x"}}"#;
        assert!(matches!(
            Signal::decode(raw),
            Err(SignalCodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_fields_is_malformed() {
        let raw = r#"{"call_id":"c","sender_id":"a","signal_type":"offer"}"#;
        assert!(matches!(
            Signal::decode(raw),
            Err(SignalCodecError::Malformed(_))
        ));

        let raw = r#"{"call_id":"c","sender_id":"a","receiver_id":"b","signal_type":"ice-candidate","signal_data":{}}"#;
        assert!(matches!(
            Signal::decode(raw),
            Err(SignalCodecError::Malformed(_))
        ));

        assert!(matches!(
            Signal::decode("not json"),
            Err(SignalCodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(SignalKind::Offer.as_str(), "offer");
        assert_eq!(SignalKind::Answer.as_str(), "answer");
        assert_eq!(SignalKind::IceCandidate.as_str(), "ice-candidate");
        assert_eq!(SignalKind::EndCall.to_string(), "end-call");
    }
}
