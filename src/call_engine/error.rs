use super::handle::HandleId;
use crate::media::MediaError;
use crate::signaling::SignalingError;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Kamera/Mikrofon fehlt oder wurde verweigert
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    /// Description setzen/erzeugen ist fehlgeschlagen
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Signaling transport error: {0}")]
    Transport(#[from] SignalingError),

    /// Operation zielt auf eine geschlossene Connection
    #[error("Peer connection {0} is closed")]
    StaleState(HandleId),
}

impl CallError {
    pub(crate) fn negotiation(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Negotiation(format!("{}: {}", context, err))
    }
}
