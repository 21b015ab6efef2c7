//! Abstraktion über die Media-Transport Connection
//!
//! Die Negotiation-Logik spricht nur mit [`PeerConnection`]; die
//! webrtc-rs Implementierung steht darunter. Rückmeldungen des Transports
//! (eigene ICE Candidates, eingehende Tracks, Zustandswechsel) kommen
//! über einen [`TransportEventSink`].

use super::error::CallError;
use super::ice::RelayDescriptor;
use super::status::{RemoteTrack, TransportState};
use crate::media::{MediaKind, TrackSet};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Rückmeldungen des Transports zu genau einer Connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Lokal gefundener ICE Candidate (Trickle-ICE)
    LocalCandidate(IceCandidate),
    /// Eingehender Remote-Track
    Track(RemoteTrack),
    StateChanged(TransportState),
}

pub type TransportEventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ============================================================================
// PEER CONNECTION
// ============================================================================

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_tracks(&self, tracks: &TrackSet) -> Result<(), CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    async fn close(&self) -> Result<(), CallError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        relays: Vec<RelayDescriptor>,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerConnection>, CallError>;
}

// ============================================================================
// WEBRTC-RS IMPLEMENTATION
// ============================================================================

/// Erzeugt echte webrtc-rs Peer Connections
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        relays: Vec<RelayDescriptor>,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        // Media Engine mit Standard-Codecs (Opus, VP8, H264, ...)
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::negotiation("register codecs", e))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| CallError::negotiation("register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: relays.into_iter().map(Into::into).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| CallError::negotiation("create peer connection", e))?,
        );

        WebRtcPeer::register_handlers(&pc, sink);

        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

/// webrtc-rs `RTCPeerConnection` hinter dem [`PeerConnection`] Interface
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcPeer {
    fn register_handlers(pc: &Arc<RTCPeerConnection>, sink: TransportEventSink) {
        // Connection State Handler
        let state_sink = Arc::clone(&sink);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("Peer connection state: {:?}", s);
            state_sink(TransportEvent::StateChanged(s.into()));
            Box::pin(async {})
        }));

        // ICE Candidate Handler
        // webrtc-rs liefert keinen usernameFragment mit, daher aus der
        // lokalen Beschreibung ergänzen
        let ice_sink = Arc::clone(&sink);
        let weak_pc = Arc::downgrade(pc);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ice_sink = Arc::clone(&ice_sink);
            let weak_pc = weak_pc.clone();
            Box::pin(async move {
                let Some(c) = candidate else { return };
                let init = match c.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        tracing::warn!("Failed to serialize local ICE candidate: {}", e);
                        return;
                    }
                };

                let username_fragment = match (init.username_fragment, weak_pc.upgrade()) {
                    (Some(ufrag), _) => Some(ufrag),
                    (None, Some(pc)) => Self::local_ufrag(&pc).await,
                    (None, None) => None,
                };

                ice_sink(TransportEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment,
                }));
            })
        }));

        // Track Handler
        let track_sink = sink;
        pc.on_track(Box::new(move |track, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Video => MediaKind::Video,
                _ => MediaKind::Audio,
            };
            tracing::info!("Received remote {:?} track: {:?}", kind, track.codec());
            track_sink(TransportEvent::Track(RemoteTrack {
                id: track.id().to_string(),
                stream_id: track.stream_id().to_string(),
                kind,
                track: Some(track),
            }));
            Box::pin(async {})
        }));
    }

    async fn local_ufrag(pc: &RTCPeerConnection) -> Option<String> {
        let local = pc.local_description().await?;
        SessionDescription::offer(local.sdp)
            .ice_ufrag()
            .map(str::to_string)
    }

    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
        let parsed = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        parsed.map_err(|e| CallError::negotiation("invalid SDP", e))
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_tracks(&self, tracks: &TrackSet) -> Result<(), CallError> {
        for local in tracks.tracks() {
            self.pc
                .add_track(Arc::clone(&local.track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| CallError::negotiation("add track", e))?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::negotiation("create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::negotiation("create answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_local_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| CallError::negotiation("set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_remote_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| CallError::negotiation("set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::negotiation("add ICE candidate", e))
    }

    async fn close(&self) -> Result<(), CallError> {
        self.pc
            .close()
            .await
            .map_err(|e| CallError::negotiation("close peer connection", e))
    }
}
