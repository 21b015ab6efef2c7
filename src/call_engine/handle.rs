//! Eine Richtung des Calls: eine Peer Connection plus ihr Zustand
//!
//! Handles werden nie umgewidmet. Wird eine Connection ungültig, wird sie
//! geschlossen und durch ein neues Handle mit neuer Identität ersetzt.

use super::peer::PeerConnection;
use crate::media::TrackSet;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandleId(Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Kurzform reicht für Logs
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Wer die Connection angestoßen hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleOrigin {
    /// Ausgehend: wir senden das Offer und unsere Tracks
    Local,
    /// Eingehend: beantwortet Offers des Gegenübers
    Remote,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Ausgehend: `New → LocalOfferCreated → Negotiating → Connected → Closed`
///
/// Eingehend: `New → RemoteOfferApplied → AnswerSent → Connected → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleState {
    New,
    LocalOfferCreated,
    Negotiating,
    RemoteOfferApplied,
    AnswerSent,
    Connected,
    Closed,
}

/// Was auch die Transport-Callbacks sehen dürfen
#[derive(Debug)]
pub(crate) struct HandleShared {
    state: Mutex<HandleState>,
    remote_ufrag: Mutex<Option<String>>,
    remote_stream: OnceCell<String>,
}

impl HandleShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandleState::New),
            remote_ufrag: Mutex::new(None),
            remote_stream: OnceCell::new(),
        })
    }

    pub fn state(&self) -> HandleState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == HandleState::Closed
    }

    /// `Closed` ist endgültig; gibt `false` zurück, wenn nichts geändert wurde
    pub fn transition(&self, next: HandleState) -> bool {
        let mut state = self.state.lock();
        if *state == HandleState::Closed || *state == next {
            return false;
        }
        *state = next;
        true
    }

    /// Merkt sich den ersten Remote-Stream; `true` nur beim ersten Mal
    pub fn mark_remote_stream(&self, stream_id: &str) -> bool {
        self.remote_stream.set(stream_id.to_string()).is_ok()
    }
}

// ============================================================================
// PEER CONNECTION HANDLE
// ============================================================================

pub struct PeerConnectionHandle {
    id: HandleId,
    origin: HandleOrigin,
    connection: Arc<dyn PeerConnection>,
    shared: Arc<HandleShared>,
    local_tracks: Option<TrackSet>,
}

impl PeerConnectionHandle {
    pub(crate) fn new(
        id: HandleId,
        origin: HandleOrigin,
        connection: Arc<dyn PeerConnection>,
        shared: Arc<HandleShared>,
        local_tracks: Option<TrackSet>,
    ) -> Self {
        Self {
            id,
            origin,
            connection,
            shared,
            local_tracks,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn origin(&self) -> HandleOrigin {
        self.origin
    }

    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn local_tracks(&self) -> Option<&TrackSet> {
        self.local_tracks.as_ref()
    }

    /// Stream-ID des ersten empfangenen Remote-Streams
    pub fn remote_stream(&self) -> Option<&str> {
        self.shared.remote_stream.get().map(String::as_str)
    }

    pub(crate) fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub(crate) fn transition(&self, next: HandleState) -> bool {
        self.shared.transition(next)
    }

    pub(crate) fn remote_ufrag(&self) -> Option<String> {
        self.shared.remote_ufrag.lock().clone()
    }

    pub(crate) fn set_remote_ufrag(&self, ufrag: Option<&str>) {
        *self.shared.remote_ufrag.lock() = ufrag.map(str::to_string);
    }

    /// Schließt die Connection und wartet auf den Transport
    pub(crate) async fn close(&self) {
        self.shared.transition(HandleState::Closed);
        if let Err(e) = self.connection.close().await {
            tracing::warn!("Failed to close peer connection {}: {}", self.id, e);
        }
    }

    /// Schließt ohne zu warten (für Drop-Pfade)
    pub(crate) fn close_detached(&self) {
        self.shared.transition(HandleState::Closed);

        let connection = Arc::clone(&self.connection);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = connection.close().await {
                        tracing::warn!("Failed to close peer connection {}: {}", id, e);
                    }
                });
            }
            Err(_) => tracing::warn!("No runtime to close peer connection {}", id),
        }
    }
}

impl std::fmt::Debug for PeerConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}
