//! Message Types für das Signaling-Protokoll
//!
//! Diese Strukturen spiegeln das JSON wider, das Browser-Clients über
//! den Relay austauschen (`offer`, `answer`, `ice-candidate`), und
//! ermöglichen typsichere Kommunikation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// EVENT NAMES
// ============================================================================

/// Event-Namen auf dem Relay-Kanal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Offer,
    Answer,
    IceCandidate,
    /// Raum betreten (nur ausgehend)
    JoinRoom,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::JoinRoom => "joinRoom",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            "joinRoom" => Some(Self::JoinRoom),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Typ einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// `{ type: "offer" | "answer", sdp: string }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Liest `a=ice-ufrag:` aus dem SDP (erste Fundstelle)
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.sdp
            .lines()
            .find_map(|line| line.trim().strip_prefix("a=ice-ufrag:"))
            .map(str::trim)
            .filter(|ufrag| !ufrag.is_empty())
    }
}

/// ICE Candidate im Browser-Format (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_ufrag(mut self, ufrag: impl Into<String>) -> Self {
        self.username_fragment = Some(ufrag.into());
        self
    }
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// Alle Negotiation-Nachrichten zwischen den beiden Peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl SignalingMessage {
    pub fn event_name(&self) -> EventName {
        match self {
            Self::Offer(_) => EventName::Offer,
            Self::Answer(_) => EventName::Answer,
            Self::IceCandidate(_) => EventName::IceCandidate,
        }
    }

    /// Serialisiert den Payload ohne Envelope
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Offer(desc) | Self::Answer(desc) => serde_json::to_value(desc),
            Self::IceCandidate(candidate) => serde_json::to_value(candidate),
        }
    }

    /// Baut eine Nachricht aus Event-Name und Payload.
    ///
    /// `Ok(None)` für Events, die keine Negotiation-Nachricht sind.
    pub fn from_event(event: EventName, payload: Value) -> Result<Option<Self>, serde_json::Error> {
        let message = match event {
            EventName::Offer => {
                let desc: SessionDescription = serde_json::from_value(payload)?;
                Some(Self::Offer(SessionDescription {
                    kind: SdpKind::Offer,
                    ..desc
                }))
            }
            EventName::Answer => {
                let desc: SessionDescription = serde_json::from_value(payload)?;
                Some(Self::Answer(SessionDescription {
                    kind: SdpKind::Answer,
                    ..desc
                }))
            }
            EventName::IceCandidate => Some(Self::IceCandidate(serde_json::from_value(payload)?)),
            EventName::JoinRoom => None,
        };
        Ok(message)
    }
}

// ============================================================================
// WIRE ENVELOPE
// ============================================================================

/// Ein WebSocket-Frame: `{"event": "...", "payload": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: EventName, payload: Value) -> Self {
        Self {
            event: event.as_str().to_string(),
            payload,
        }
    }

    pub fn from_message(message: &SignalingMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::new(message.event_name(), message.payload()?))
    }
}
