//! Call Engine Module - Negotiation eines Zwei-Personen-Calls
//!
//! Dieses Modul verwaltet:
//! - Ausgehende und eingehende Peer Connections (Offer/Answer)
//! - Trickle-ICE inklusive Pufferung verfrühter Candidates
//! - Start, Ende und Reconnect eines Calls
//! - STUN/TURN Konfiguration

mod controller;
mod error;
mod handle;
mod ice;
mod peer;
mod router;
mod session;
mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{CallGuard, CallLifecycleController, DEFAULT_RECONNECT_DELAY};
pub use error::CallError;
pub use handle::{HandleId, HandleOrigin, HandleState, PeerConnectionHandle};
pub use ice::{stun_and_turn, IceTransportConfig, RelayDescriptor, DEFAULT_STUN_URL};
pub use peer::{
    PeerConnection, PeerConnectionFactory, TransportEvent, TransportEventSink, WebRtcPeer,
    WebRtcPeerFactory,
};
pub use router::{PendingCounts, PendingQueue, SignalingMessageRouter};
pub use session::{AnswerOutcome, CandidateOutcome, NegotiationSession};
pub use status::{CallEvent, CallStatus, RemoteTrack, TransportState};
