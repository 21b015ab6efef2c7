//! duocall - Zwei-Personen WebRTC Calls über einen Relay-Server
//!
//! Ein Call besteht aus zwei unabhängigen Peer Connections:
//! - Ausgehend: wir senden Offer und lokale Tracks
//! - Eingehend: beantwortet Offers des Gegenübers
//!
//! Signaling (`offer`, `answer`, `ice-candidate`) läuft über einen
//! WebSocket-Relay, der Nachrichten an alle anderen Teilnehmer weiterleitet.

pub mod call_engine;
pub mod config;
pub mod crypto;
pub mod media;
pub mod signaling;

pub use call_engine::{
    CallError, CallEvent, CallGuard, CallLifecycleController, CallStatus, IceTransportConfig,
    WebRtcPeerFactory,
};
pub use config::{CallConfig, ConfigError};
pub use media::{MediaSource, StaticTrackSource};
pub use signaling::{SignalingChannel, WsSignalingChannel};

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// LOGGING
// ============================================================================

/// Standard-Filter, falls `RUST_LOG` nicht gesetzt ist
pub const DEFAULT_LOG_FILTER: &str = "duocall=debug,webrtc=warn";

/// Logging initialisieren. Mehrfacher Aufruf ist harmlos.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}

// ============================================================================
// WIRING
// ============================================================================

/// Baut einen Controller mit WebSocket-Signaling und webrtc-rs Transport
pub fn controller_from_config(
    config: &CallConfig,
    media: Arc<dyn MediaSource>,
) -> CallLifecycleController {
    let channel = Arc::new(WsSignalingChannel::new(
        config.signaling_url.clone(),
        config.room.clone(),
    ));

    CallLifecycleController::new(
        channel,
        media,
        Arc::new(WebRtcPeerFactory::new()),
        config.ice_config(),
    )
    .with_reconnect_delay(config.reconnect_delay())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }

    #[tokio::test]
    async fn test_controller_from_default_config() {
        let controller =
            controller_from_config(&CallConfig::default(), Arc::new(StaticTrackSource::default()));
        assert_eq!(controller.current_status(), CallStatus::Idle);
        assert!(!controller.session().is_active().await);
    }
}
