//! Signaling Module - Relay-Kanal zum Gegenüber
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay-Server:
//! - Typisierte Negotiation-Nachrichten (`offer`, `answer`, `ice-candidate`)
//! - Das abstrakte `SignalingChannel` Interface
//! - Die WebSocket-Implementierung
//!

mod channel;
mod client;
mod messages;

pub use channel::{ChannelEvent, SignalingChannel, SignalingError};
pub use client::WsSignalingChannel;
pub use messages::*;
