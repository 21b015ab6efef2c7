//! Verteilt eingehende Signaling-Nachrichten an die Session
//!
//! Nachrichten, für die es noch keinen Empfänger gibt, landen in FIFO
//! Queues und werden später in Ankunftsreihenfolge nachgespielt.

use super::session::{AnswerOutcome, CandidateOutcome, NegotiationSession};
use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage};
use std::collections::VecDeque;

// ============================================================================
// PENDING QUEUE
// ============================================================================

/// FIFO Puffer für noch nicht zustellbare Nachrichten
#[derive(Debug, Clone)]
pub struct PendingQueue<T> {
    items: VecDeque<T>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Leert die Queue und gibt den Inhalt in Ankunftsreihenfolge zurück
    pub fn take_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Füllstand der drei Queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub offers: usize,
    pub answers: usize,
    pub candidates: usize,
}

// ============================================================================
// SIGNALING MESSAGE ROUTER
// ============================================================================

#[derive(Debug, Default)]
pub struct SignalingMessageRouter {
    offers: PendingQueue<SessionDescription>,
    answers: PendingQueue<SessionDescription>,
    candidates: PendingQueue<IceCandidate>,
}

impl SignalingMessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn route(&mut self, session: &NegotiationSession, message: SignalingMessage) {
        tracing::debug!("Routing {} message", message.event_name());
        match message {
            SignalingMessage::Offer(offer) => self.on_offer(session, offer).await,
            SignalingMessage::Answer(answer) => self.on_answer(session, answer).await,
            SignalingMessage::IceCandidate(candidate) => {
                self.on_ice_candidate(session, candidate).await
            }
        }
    }

    /// Offers werden erst beantwortet, wenn ein Call läuft
    pub async fn on_offer(&mut self, session: &NegotiationSession, offer: SessionDescription) {
        if !session.is_active().await {
            self.offers.push(offer);
            tracing::debug!("No active call, queued offer ({} pending)", self.offers.len());
            return;
        }

        if session.handle_offer(offer).await.is_ok() {
            self.drain_candidates(session).await;
        }
    }

    pub async fn on_answer(&mut self, session: &NegotiationSession, answer: SessionDescription) {
        if !session.has_outbound().await {
            self.answers.push(answer);
            tracing::debug!(
                "No outbound connection, queued answer ({} pending)",
                self.answers.len()
            );
            return;
        }

        if let Ok(AnswerOutcome::Applied) = session.handle_answer(answer).await {
            self.drain_candidates(session).await;
        }
    }

    pub async fn on_ice_candidate(&mut self, session: &NegotiationSession, candidate: IceCandidate) {
        match session.apply_remote_candidate(candidate).await {
            Ok(CandidateOutcome::Applied(origin)) => {
                tracing::trace!("Applied remote ICE candidate to {:?} connection", origin);
            }
            Ok(CandidateOutcome::Deferred(candidate)) => {
                self.candidates.push(candidate);
                tracing::debug!(
                    "No matching connection, queued ICE candidate ({} pending)",
                    self.candidates.len()
                );
            }
            // Bereits von der Session gemeldet
            Err(_) => {}
        }
    }

    /// Spielt gepufferte Offers nach; solche ohne aktiven Call bleiben liegen
    pub async fn drain_offers(&mut self, session: &NegotiationSession) {
        let pending = self.offers.take_all();
        if !pending.is_empty() {
            tracing::info!("Replaying {} queued offer(s)", pending.len());
        }
        for offer in pending {
            self.on_offer(session, offer).await;
        }
    }

    pub async fn drain_answers(&mut self, session: &NegotiationSession) {
        let pending = self.answers.take_all();
        if !pending.is_empty() {
            tracing::info!("Replaying {} queued answer(s)", pending.len());
        }
        for answer in pending {
            self.on_answer(session, answer).await;
        }
    }

    /// Wendet alle zustellbaren Candidates an; der Rest bleibt in
    /// ursprünglicher Reihenfolge liegen
    pub async fn drain_candidates(&mut self, session: &NegotiationSession) {
        let pending = self.candidates.take_all();
        if pending.is_empty() {
            return;
        }
        let total = pending.len();

        for candidate in pending {
            self.on_ice_candidate(session, candidate).await;
        }

        tracing::debug!(
            "Drained ICE candidates: {} applied, {} still pending",
            total.saturating_sub(self.candidates.len()),
            self.candidates.len()
        );
    }

    pub fn clear(&mut self) {
        let counts = self.pending();
        if counts != PendingCounts::default() {
            tracing::debug!("Dropping queued messages: {:?}", counts);
        }
        self.offers.clear();
        self.answers.clear();
        self.candidates.clear();
    }

    pub fn pending(&self) -> PendingCounts {
        PendingCounts {
            offers: self.offers.len(),
            answers: self.answers.len(),
            candidates: self.candidates.len(),
        }
    }

    pub fn pending_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.candidates.iter()
    }
}
