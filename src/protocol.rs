//! Signaling room protocol: event names and their payloads

use crate::errors::SessionError;
use crate::webrtc::{IceCandidate, SdpType, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_JOIN: &str = "join";
pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_CANDIDATE: &str = "candidate";
pub const EVENT_RENEGOTIATE: &str = "renegotiate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub room: String,
}

/// `{offer: {sdp, type}, room, jetson: true}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEnvelope {
    pub offer: SessionDescription,
    pub room: String,
    pub jetson: bool,
}

impl OfferEnvelope {
    pub fn new(offer: SessionDescription, room: &str) -> Self {
        Self {
            offer,
            room: room.to_string(),
            jetson: true,
        }
    }
}

/// Inbound answer. Browsers sometimes omit fields, so both are optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerPayload {
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(rename = "type", default)]
    pub sdp_type: Option<SdpType>,
}

impl AnswerPayload {
    /// Non-empty sdp containing a media section marker
    pub fn is_usable(&self) -> bool {
        self.sdp
            .as_deref()
            .map(|sdp| !sdp.is_empty() && sdp.contains("m="))
            .unwrap_or(false)
    }

    /// A missing `type` is taken as `answer`; any other type is kept so the
    /// session can reject it.
    pub fn into_description(self) -> SessionDescription {
        SessionDescription {
            sdp_type: self.sdp_type.unwrap_or(SdpType::Answer),
            sdp: self.sdp.unwrap_or_default(),
        }
    }
}

/// Parsed inbound signaling event
#[derive(Debug, Clone)]
pub enum Inbound {
    Answer(AnswerPayload),
    Candidate(IceCandidate),
    Renegotiate,
    Other(String),
}

impl Inbound {
    pub fn from_event(name: &str, payload: Value) -> Result<Self, SessionError> {
        let invalid = |e: serde_json::Error| SessionError::InvalidPayload {
            event: name.to_string(),
            message: e.to_string(),
        };

        match name {
            EVENT_ANSWER => {
                let payload = if payload.is_null() {
                    AnswerPayload::default()
                } else {
                    serde_json::from_value(payload).map_err(invalid)?
                };
                Ok(Inbound::Answer(payload))
            }
            EVENT_CANDIDATE => Ok(Inbound::Candidate(
                serde_json::from_value(payload).map_err(invalid)?,
            )),
            EVENT_RENEGOTIATE => Ok(Inbound::Renegotiate),
            other => Ok(Inbound::Other(other.to_string())),
        }
    }
}
