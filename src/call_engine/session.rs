//! Negotiation Session
//!
//! Besitzt die ausgehende und die eingehende Peer Connection eines Calls
//! und führt die Offer/Answer/ICE State Machine aus. Alle Operationen
//! laufen unter einem einzigen Mutex, damit sich zwei Signaling-Nachrichten
//! nie überholen können.

use super::error::CallError;
use super::handle::{HandleId, HandleOrigin, HandleShared, HandleState, PeerConnectionHandle};
use super::ice::IceTransportConfig;
use super::peer::{PeerConnectionFactory, TransportEvent, TransportEventSink};
use super::status::{CallEvent, CallStatus, Notifier, TransportState};
use crate::media::TrackSet;
use crate::signaling::{IceCandidate, SessionDescription, SignalingChannel, SignalingMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ergebnis von [`NegotiationSession::handle_answer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Remote Description gesetzt, ausgehende Connection ist `Connected`
    Applied,
    /// Ausgehende Connection war geschlossen, neues Offer wurde gesendet
    Restarted,
}

/// Ergebnis von [`NegotiationSession::apply_remote_candidate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied(HandleOrigin),
    /// Ziel-Connection existiert noch nicht, Candidate zurück an den Aufrufer
    Deferred(IceCandidate),
}

#[derive(Default)]
struct SessionInner {
    outbound: Option<PeerConnectionHandle>,
    inbound: Option<PeerConnectionHandle>,
    tracks: Option<TrackSet>,
    /// Ein Call läuft (ausgehende Connection wurde erfolgreich aufgebaut)
    active: bool,
}

impl SessionInner {
    fn open(handle: &Option<PeerConnectionHandle>) -> Option<&PeerConnectionHandle> {
        handle.as_ref().filter(|h| !h.is_closed())
    }

    /// Welche Connection einen Remote-Candidate bekommt.
    ///
    /// Mit `usernameFragment` wird gegen die Remote Description beider
    /// Connections gematcht, ohne geht er an die eingehende.
    fn candidate_target(&self, candidate: &IceCandidate) -> Option<HandleOrigin> {
        match candidate.username_fragment.as_deref() {
            Some(ufrag) => {
                let same_ufrag =
                    |h: &PeerConnectionHandle| h.remote_ufrag().as_deref() == Some(ufrag);
                if Self::open(&self.outbound).is_some_and(same_ufrag) {
                    Some(HandleOrigin::Local)
                } else if Self::open(&self.inbound).is_some_and(same_ufrag) {
                    Some(HandleOrigin::Remote)
                } else {
                    None
                }
            }
            None => Self::open(&self.inbound)
                .filter(|h| h.state() != HandleState::New)
                .map(|_| HandleOrigin::Remote),
        }
    }

    fn handle(&self, origin: HandleOrigin) -> Option<&PeerConnectionHandle> {
        match origin {
            HandleOrigin::Local => self.outbound.as_ref(),
            HandleOrigin::Remote => self.inbound.as_ref(),
        }
    }

    fn live_handles(&self) -> usize {
        [&self.outbound, &self.inbound]
            .into_iter()
            .filter(|h| Self::open(h).is_some())
            .count()
    }

    /// Schließt alles, ohne auf den Transport zu warten
    fn teardown_detached(&mut self) -> bool {
        let mut had_any = false;
        for handle in [self.outbound.take(), self.inbound.take()].into_iter().flatten() {
            handle.close_detached();
            had_any = true;
        }
        if let Some(tracks) = self.tracks.take() {
            tracks.stop();
            had_any = true;
        }
        self.active = false;
        had_any
    }
}

// ============================================================================
// NEGOTIATION SESSION
// ============================================================================

pub struct NegotiationSession {
    inner: Mutex<SessionInner>,
    /// `start_call` läuft oder ein Call ist aktiv
    calling: AtomicBool,
    factory: Arc<dyn PeerConnectionFactory>,
    channel: Arc<dyn SignalingChannel>,
    ice: IceTransportConfig,
    notifier: Notifier,
}

impl NegotiationSession {
    pub(crate) fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        channel: Arc<dyn SignalingChannel>,
        ice: IceTransportConfig,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner::default()),
            calling: AtomicBool::new(false),
            factory,
            channel,
            ice,
            notifier,
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active
    }

    pub async fn has_outbound(&self) -> bool {
        self.inner.lock().await.outbound.is_some()
    }

    pub async fn outbound_state(&self) -> Option<HandleState> {
        self.inner.lock().await.outbound.as_ref().map(|h| h.state())
    }

    pub async fn inbound_state(&self) -> Option<HandleState> {
        self.inner.lock().await.inbound.as_ref().map(|h| h.state())
    }

    pub async fn outbound_id(&self) -> Option<HandleId> {
        self.inner.lock().await.outbound.as_ref().map(|h| h.id())
    }

    pub async fn inbound_id(&self) -> Option<HandleId> {
        self.inner.lock().await.inbound.as_ref().map(|h| h.id())
    }

    /// Anzahl nicht geschlossener Connections
    pub async fn live_handles(&self) -> usize {
        self.inner.lock().await.live_handles()
    }

    // ========================================================================
    // IN-PROGRESS FLAG
    // ========================================================================

    /// Setzt das In-Progress-Flag; `false`, wenn es schon gesetzt war
    pub(crate) fn try_begin_call(&self) -> bool {
        !self.calling.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_call_in_progress(&self) -> bool {
        self.calling.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_call_flag(&self) {
        self.calling.store(false, Ordering::SeqCst);
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Räumt einen vorherigen Call ab und baut die ausgehende Connection auf
    pub async fn start(&self, tracks: TrackSet) -> Result<(), CallError> {
        let mut inner = self.inner.lock().await;

        if Self::teardown(&mut inner).await {
            tracing::info!("Tore down previous call before starting a new one");
        }
        inner.tracks = Some(tracks);

        match self.create_outbound(&mut inner).await {
            Ok(()) => {
                inner.active = true;
                Ok(())
            }
            Err(e) => {
                if let Some(tracks) = inner.tracks.take() {
                    tracks.stop();
                }
                self.clear_call_flag();
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Schließt alle Connections und gibt die lokalen Tracks frei.
    ///
    /// Gibt zurück, ob überhaupt etwas aktiv war.
    pub async fn close_all(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.clear_call_flag();
        Self::teardown(&mut inner).await
    }

    /// Synchroner Teardown für Drop-Pfade
    pub(crate) fn teardown_now(self: &Arc<Self>) {
        self.clear_call_flag();
        match self.inner.try_lock() {
            Ok(mut inner) => {
                inner.teardown_detached();
            }
            Err(_) => match tokio::runtime::Handle::try_current() {
                // Eine Operation hält den Lock, danach aufräumen
                Ok(runtime) => {
                    let session = Arc::clone(self);
                    runtime.spawn(async move {
                        session.close_all().await;
                    });
                }
                Err(_) => tracing::warn!("Session busy and no runtime available for teardown"),
            },
        }
    }

    async fn teardown(inner: &mut SessionInner) -> bool {
        let mut had_any = false;
        for handle in [inner.outbound.take(), inner.inbound.take()].into_iter().flatten() {
            tracing::debug!("Closing {:?} peer connection {}", handle.origin(), handle.id());
            handle.close().await;
            had_any = true;
        }
        if let Some(tracks) = inner.tracks.take() {
            tracks.stop();
            had_any = true;
        }
        inner.active = false;
        had_any
    }

    // ========================================================================
    // NEGOTIATION
    // ========================================================================

    /// Neue ausgehende Connection: Tracks anhängen, Offer erzeugen und senden
    async fn create_outbound(&self, inner: &mut SessionInner) -> Result<(), CallError> {
        let tracks = inner
            .tracks
            .clone()
            .ok_or_else(|| CallError::Negotiation("no local tracks acquired".to_string()))?;

        if let Some(previous) = inner.outbound.take() {
            previous.close().await;
        }

        let handle = self
            .new_handle(HandleOrigin::Local, Some(tracks.clone()))
            .await?;

        let result = async {
            let connection = Arc::clone(handle.connection());
            connection.add_tracks(&tracks).await?;

            let offer = connection.create_offer().await?;
            connection.set_local_description(offer.clone()).await?;
            Self::ensure_open(&handle)?;
            handle.transition(HandleState::LocalOfferCreated);

            self.channel.emit(&SignalingMessage::Offer(offer))?;
            handle.transition(HandleState::Negotiating);
            Ok::<(), CallError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!("Sent offer from outbound connection {}", handle.id());
                inner.outbound = Some(handle);
                Ok(())
            }
            Err(e) => {
                handle.close().await;
                Err(e)
            }
        }
    }

    /// Verarbeitet ein Offer des Gegenübers
    pub async fn handle_offer(&self, offer: SessionDescription) -> Result<(), CallError> {
        let mut inner = self.inner.lock().await;
        let result = self.apply_offer(&mut inner, offer).await;
        self.finish(result)
    }

    async fn apply_offer(
        &self,
        inner: &mut SessionInner,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        if SessionInner::open(&inner.inbound).is_some() {
            tracing::debug!("Renegotiating on existing inbound connection");
        } else {
            if let Some(stale) = inner.inbound.take() {
                tracing::info!("Replacing closed inbound connection {}", stale.id());
            }
            inner.inbound = Some(self.new_handle(HandleOrigin::Remote, None).await?);
        }

        let handle = inner
            .inbound
            .as_ref()
            .ok_or_else(|| CallError::Negotiation("inbound connection missing".to_string()))?;
        let connection = Arc::clone(handle.connection());

        connection.set_remote_description(offer.clone()).await?;
        Self::ensure_open(handle)?;
        handle.set_remote_ufrag(offer.ice_ufrag());
        handle.transition(HandleState::RemoteOfferApplied);

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        Self::ensure_open(handle)?;

        self.channel.emit(&SignalingMessage::Answer(answer))?;
        handle.transition(HandleState::AnswerSent);
        tracing::info!("Sent answer from inbound connection {}", handle.id());

        Ok(())
    }

    /// Verarbeitet ein Answer auf unser Offer.
    ///
    /// Ist die ausgehende Connection inzwischen geschlossen, wird sie neu
    /// aufgebaut statt das (veraltete) Answer anzuwenden.
    pub async fn handle_answer(&self, answer: SessionDescription) -> Result<AnswerOutcome, CallError> {
        let mut inner = self.inner.lock().await;
        let result = self.apply_answer(&mut inner, answer).await;
        self.finish(result)
    }

    async fn apply_answer(
        &self,
        inner: &mut SessionInner,
        answer: SessionDescription,
    ) -> Result<AnswerOutcome, CallError> {
        let closed = match inner.outbound.as_ref() {
            Some(outbound) => outbound.is_closed(),
            None => {
                return Err(CallError::Negotiation(
                    "answer received without outbound connection".to_string(),
                ))
            }
        };

        if closed {
            tracing::info!("Outbound connection is closed, restarting negotiation");
            if let Err(e) = self.create_outbound(inner).await {
                inner.active = false;
                if let Some(tracks) = inner.tracks.take() {
                    tracks.stop();
                }
                self.clear_call_flag();
                return Err(e);
            }
            return Ok(AnswerOutcome::Restarted);
        }

        let outbound = inner
            .outbound
            .as_ref()
            .ok_or_else(|| CallError::Negotiation("outbound connection missing".to_string()))?;

        outbound
            .connection()
            .set_remote_description(answer.clone())
            .await?;
        Self::ensure_open(outbound)?;
        outbound.set_remote_ufrag(answer.ice_ufrag());
        outbound.transition(HandleState::Connected);
        tracing::info!("Outbound connection {} applied answer", outbound.id());

        Ok(AnswerOutcome::Applied)
    }

    /// Wendet einen Remote-Candidate an oder gibt ihn zurück, wenn die
    /// Ziel-Connection noch nicht bereit ist
    pub async fn apply_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, CallError> {
        let inner = self.inner.lock().await;

        let Some(origin) = inner.candidate_target(&candidate) else {
            return Ok(CandidateOutcome::Deferred(candidate));
        };
        let handle = inner
            .handle(origin)
            .ok_or_else(|| CallError::Negotiation("candidate target vanished".to_string()))?;

        let result = handle
            .connection()
            .add_ice_candidate(candidate)
            .await
            .map(|()| CandidateOutcome::Applied(origin));
        self.finish(result)
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn new_handle(
        &self,
        origin: HandleOrigin,
        tracks: Option<TrackSet>,
    ) -> Result<PeerConnectionHandle, CallError> {
        let id = HandleId::new();
        let shared = HandleShared::new();
        let sink = self.transport_sink(id, Arc::clone(&shared));

        let connection = self.factory.create(self.ice.resolve(), sink).await?;
        tracing::info!("Created {:?} peer connection {}", origin, id);

        Ok(PeerConnectionHandle::new(id, origin, connection, shared, tracks))
    }

    /// Callback für Transport-Events genau einer Connection
    fn transport_sink(&self, id: HandleId, shared: Arc<HandleShared>) -> TransportEventSink {
        let channel = Arc::clone(&self.channel);
        let notifier = self.notifier.clone();

        Arc::new(move |event: TransportEvent| match event {
            TransportEvent::LocalCandidate(candidate) => {
                // Trickle-ICE: jeder Candidate geht sofort raus
                if let Err(e) = channel.emit(&SignalingMessage::IceCandidate(candidate)) {
                    notifier.report(&CallError::Transport(e));
                }
            }
            TransportEvent::Track(track) => {
                if shared.is_closed() {
                    tracing::debug!("Ignoring track on closed connection {}", id);
                    return;
                }
                if shared.mark_remote_stream(&track.stream_id) {
                    notifier.emit(CallEvent::RemoteStream {
                        handle: id,
                        stream_id: track.stream_id.clone(),
                    });
                }
                notifier.emit(CallEvent::RemoteTrack { handle: id, track });
            }
            TransportEvent::StateChanged(state) => {
                if shared.is_closed() {
                    return;
                }
                match state {
                    TransportState::Connected => {
                        shared.transition(HandleState::Connected);
                    }
                    TransportState::Failed | TransportState::Closed => {
                        tracing::warn!("Peer connection {} reported {:?}", id, state);
                        shared.transition(HandleState::Closed);
                    }
                    _ => {}
                }
                notifier.set_status(CallStatus::IceState(state));
            }
        })
    }

    fn ensure_open(handle: &PeerConnectionHandle) -> Result<(), CallError> {
        if handle.is_closed() {
            Err(CallError::StaleState(handle.id()))
        } else {
            Ok(())
        }
    }

    /// Fehler an der Operationsgrenze sichtbar machen
    fn finish<T>(&self, result: Result<T, CallError>) -> Result<T, CallError> {
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    fn report(&self, error: &CallError) {
        match error {
            // Kein Fehler im eigentlichen Sinn: Ergebnis einer ersetzten Connection
            CallError::StaleState(id) => {
                tracing::info!("Discarding result for superseded connection {}", id)
            }
            _ => self.notifier.report(error),
        }
    }
}

impl Drop for NegotiationSession {
    fn drop(&mut self) {
        self.inner.get_mut().teardown_detached();
    }
}

impl std::fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("calling", &self.is_call_in_progress())
            .finish()
    }
}
