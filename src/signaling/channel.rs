//! Abstrakter Signaling-Kanal zum Gegenüber
//!
//! Die Call Engine kennt nur dieses Interface; die konkrete
//! Transport-Implementierung (WebSocket, In-Memory für Tests) ist
//! austauschbar.

use super::messages::SignalingMessage;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Malformed signaling payload: {0}")]
    Malformed(String),

    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("Signaling event stream already taken")]
    EventsTaken,
}

// ============================================================================
// CHANNEL EVENTS
// ============================================================================

/// Events die vom Signaling-Kanal ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Verbunden mit dem Relay
    Connected,

    /// Verbindung getrennt (nicht bei bewusstem `close()`)
    Disconnected,

    /// Transportfehler, die Verbindung kann weiter bestehen
    Error(String),

    /// Negotiation-Nachricht vom Gegenüber
    Message(SignalingMessage),
}

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Baut die Verbindung auf. Erneuter Aufruf nach einem Disconnect
    /// verbindet neu.
    async fn connect(&self) -> Result<(), SignalingError>;

    /// Übergibt den Event-Stream. Liefert nur beim ersten Aufruf `Some`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;

    /// Sendet eine Nachricht, ohne zu blockieren
    fn emit(&self, message: &SignalingMessage) -> Result<(), SignalingError>;

    /// Schließt den Kanal. Mehrfacher Aufruf ist erlaubt.
    fn close(&self);

    fn is_connected(&self) -> bool;
}
