//! Call-Status und Events für die Präsentationsschicht
//!
//! Beides ist reine Projektion: die Negotiation-Logik liest den Status nie.

use super::error::CallError;
use super::handle::HandleId;
use crate::media::{LocalStream, MediaKind};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// TRANSPORT STATE
// ============================================================================

/// Vom Transport gemeldeter Zustand einer Peer Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

// ============================================================================
// CALL STATUS
// ============================================================================

/// Aktuelle Phase, wie sie die UI anzeigt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// Noch nichts passiert
    Idle,
    /// Signaling-Kanal steht, kein Call aktiv
    Connected,
    /// Signaling-Kanal getrennt, Reconnect läuft
    Reconnecting,
    /// `start_call` läuft
    Connecting,
    InCall,
    IceState(TransportState),
    Error(String),
    Ended,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Connecting => f.write_str("connecting"),
            Self::InCall => f.write_str("in-call"),
            Self::IceState(state) => write!(f, "ice-state-{}", state.as_str()),
            Self::Error(reason) => write!(f, "error: {}", reason),
            Self::Ended => f.write_str("ended"),
        }
    }
}

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Ein eingehender Track
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    /// Der eigentliche Track, falls der Transport einen liefert
    pub track: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Events die von der Call Engine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Lokale Tracks sind beschafft
    LocalStream(LocalStream),
    /// Erster Track eines Remote-Streams auf dieser Connection
    RemoteStream { handle: HandleId, stream_id: String },
    RemoteTrack { handle: HandleId, track: RemoteTrack },
    Error(String),
}

// ============================================================================
// NOTIFIER
// ============================================================================

/// Gemeinsamer Ausgang für Status und Events
#[derive(Clone)]
pub(crate) struct Notifier {
    status: Arc<watch::Sender<CallStatus>>,
    events: broadcast::Sender<CallEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (status, _) = watch::channel(CallStatus::Idle);
        let (events, _) = broadcast::channel(100);

        Self {
            status: Arc::new(status),
            events,
        }
    }

    pub fn set_status(&self, status: CallStatus) {
        let previous = self.status.send_replace(status.clone());
        if previous != status {
            tracing::info!("Call status: {}", status);
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CallStatus> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    /// Fehler loggen und sichtbar machen
    pub fn report(&self, error: &CallError) {
        tracing::error!("{}", error);
        self.set_status(CallStatus::Error(error.to_string()));
        self.emit(CallEvent::Error(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(CallStatus::InCall.to_string(), "in-call");
        assert_eq!(
            CallStatus::IceState(TransportState::Connected).to_string(),
            "ice-state-connected"
        );
        assert_eq!(CallStatus::Ended.to_string(), "ended");
    }

    #[test]
    fn test_report_sets_error_status_and_event() {
        let notifier = Notifier::new();
        let mut events = notifier.subscribe();

        notifier.report(&CallError::Negotiation("bad sdp".into()));

        assert_eq!(
            notifier.status(),
            CallStatus::Error("Negotiation failed: bad sdp".into())
        );
        assert!(matches!(events.try_recv(), Ok(CallEvent::Error(_))));
    }

    #[test]
    fn test_watchers_see_latest_status() {
        let notifier = Notifier::new();
        let watcher = notifier.watch();
        notifier.set_status(CallStatus::Connecting);
        notifier.set_status(CallStatus::InCall);
        assert_eq!(*watcher.borrow(), CallStatus::InCall);
    }
}
