//! In-Memory Fakes für Transport, Signaling und Media

use super::error::CallError;
use super::ice::{IceTransportConfig, RelayDescriptor};
use super::peer::{PeerConnection, PeerConnectionFactory, TransportEvent, TransportEventSink};
use super::session::NegotiationSession;
use super::status::{Notifier, RemoteTrack, TransportState};
use crate::media::{LocalTrack, MediaError, MediaKind, MediaSource, TrackSet};
use crate::signaling::{
    ChannelEvent, IceCandidate, SessionDescription, SignalingChannel, SignalingError,
    SignalingMessage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub(crate) fn audio_tracks(stream_id: &str) -> TrackSet {
    TrackSet::new(
        stream_id,
        vec![LocalTrack::new(MediaKind::Audio, "audio", stream_id)],
    )
}

pub(crate) fn session_with_fakes() -> (
    Arc<NegotiationSession>,
    Arc<FakeFactory>,
    Arc<FakeChannel>,
    Notifier,
) {
    let factory = FakeFactory::new();
    let channel = FakeChannel::new();
    let notifier = Notifier::new();
    let session = Arc::new(NegotiationSession::new(
        factory.clone(),
        channel.clone(),
        IceTransportConfig::default(),
        notifier.clone(),
    ));
    (session, factory, channel, notifier)
}

// ============================================================================
// PEER CONNECTIONS
// ============================================================================

/// Steuert das Verhalten aller Fake-Peers einer Factory
#[derive(Default)]
pub(crate) struct FakeScript {
    offers: AtomicUsize,
    answers: AtomicUsize,
    fail_offer: AtomicBool,
    fail_remote: AtomicBool,
    close_during_offer: AtomicBool,
}

impl FakeScript {
    pub fn fail_next_offer(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    /// Der Transport schließt die Connection, während das Offer entsteht
    pub fn close_during_next_offer(&self) {
        self.close_during_offer.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct FakePeer {
    script: Arc<FakeScript>,
    sink: TransportEventSink,
    relays: Vec<RelayDescriptor>,
    tracks: Mutex<Vec<String>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn fire(&self, event: TransportEvent) {
        (self.sink)(event);
    }

    pub fn fire_track(&self, stream_id: &str, track_id: &str) {
        self.fire(TransportEvent::Track(RemoteTrack {
            id: track_id.to_string(),
            stream_id: stream_id.to_string(),
            kind: MediaKind::Audio,
            track: None,
        }));
    }

    pub fn relays(&self) -> Vec<RelayDescriptor> {
        self.relays.clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().last().cloned()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), CallError> {
        if self.is_closed() {
            Err(CallError::Negotiation("connection is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_tracks(&self, tracks: &TrackSet) -> Result<(), CallError> {
        self.check_open()?;
        self.tracks
            .lock()
            .extend(tracks.tracks().iter().map(|t| t.id.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.check_open()?;
        if self.script.fail_offer.swap(false, Ordering::SeqCst) {
            return Err(CallError::Negotiation("create offer: scripted".to_string()));
        }
        if self.script.close_during_offer.swap(false, Ordering::SeqCst) {
            self.fire(TransportEvent::StateChanged(TransportState::Closed));
        }
        let n = self.script.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("O{}", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.check_open()?;
        if self.remote.lock().is_empty() {
            return Err(CallError::Negotiation("create answer: no remote offer".to_string()));
        }
        let n = self.script.answers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::answer(format!("A{}", n)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.check_open()?;
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.check_open()?;
        if self.script.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(CallError::Negotiation(
                "set remote description: scripted".to_string(),
            ));
        }
        self.remote.lock().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.check_open()?;
        if self.remote.lock().is_empty() {
            return Err(CallError::Negotiation(
                "add ICE candidate: no remote description".to_string(),
            ));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), CallError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeFactory {
    script: Arc<FakeScript>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self) -> &FakeScript {
        &self.script
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    /// Peers in Erzeugungsreihenfolge
    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        Arc::clone(&self.peers.lock()[index])
    }

    pub fn open_peers(&self) -> usize {
        self.peers.lock().iter().filter(|p| !p.is_closed()).count()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        relays: Vec<RelayDescriptor>,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let peer = Arc::new(FakePeer {
            script: Arc::clone(&self.script),
            sink,
            relays,
            tracks: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ============================================================================
// SIGNALING
// ============================================================================

pub(crate) struct FakeChannel {
    emitted: Mutex<Vec<SignalingMessage>>,
    connect_attempts: Mutex<Vec<Instant>>,
    failing_connects: AtomicUsize,
    connected: AtomicBool,
    closed: AtomicBool,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            emitted: Mutex::new(Vec::new()),
            connect_attempts: Mutex::new(Vec::new()),
            failing_connects: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Die nächsten `n` Verbindungsversuche schlagen fehl
    pub fn fail_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Simuliert ein Event vom Relay
    pub fn inject(&self, event: ChannelEvent) {
        if matches!(event, ChannelEvent::Disconnected) {
            self.connected.store(false, Ordering::SeqCst);
        }
        let _ = self.event_tx.send(event);
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.connect_attempts.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> Vec<SignalingMessage> {
        self.emitted.lock().clone()
    }

    pub fn offers(&self) -> Vec<SessionDescription> {
        self.emitted()
            .into_iter()
            .filter_map(|m| match m {
                SignalingMessage::Offer(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<SessionDescription> {
        self.emitted()
            .into_iter()
            .filter_map(|m| match m {
                SignalingMessage::Answer(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.emitted()
            .into_iter()
            .filter_map(|m| match m {
                SignalingMessage::IceCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn connect(&self) -> Result<(), SignalingError> {
        self.connect_attempts.lock().push(Instant::now());

        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(SignalingError::ConnectionFailed("connection refused".to_string()));
        }

        self.connected.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(ChannelEvent::Connected);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.event_rx.lock().take()
    }

    fn emit(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::NotConnected);
        }
        self.emitted.lock().push(message.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MEDIA
// ============================================================================

#[derive(Default)]
pub(crate) struct FakeMedia {
    fail: AtomicBool,
    acquired: Mutex<Vec<TrackSet>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> Vec<TrackSet> {
        self.acquired.lock().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self) -> Result<TrackSet, MediaError> {
        // Kamera-Dialog: einmal an den Scheduler abgeben
        tokio::task::yield_now().await;

        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }

        let mut acquired = self.acquired.lock();
        let tracks = audio_tracks(&format!("local-{}", acquired.len() + 1));
        acquired.push(tracks.clone());
        Ok(tracks)
    }
}
