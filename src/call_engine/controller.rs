//! Call Lifecycle Controller
//!
//! Öffentlicher Einstiegspunkt: startet und beendet Calls, hängt am
//! Signaling-Kanal und verbindet nach Abbrüchen automatisch neu.

use super::error::CallError;
use super::ice::IceTransportConfig;
use super::peer::PeerConnectionFactory;
use super::router::{PendingCounts, SignalingMessageRouter};
use super::session::NegotiationSession;
use super::status::{CallEvent, CallStatus, Notifier};
use crate::media::{LocalStream, MediaSource};
use crate::signaling::{ChannelEvent, SignalingChannel, SignalingError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Wartezeit zwischen zwei Reconnect-Versuchen
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

// ============================================================================
// CALL LIFECYCLE CONTROLLER
// ============================================================================

pub struct CallLifecycleController {
    session: Arc<NegotiationSession>,
    router: Mutex<SignalingMessageRouter>,
    channel: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaSource>,
    notifier: Notifier,
    reconnect_delay: Duration,
    shutdown: watch::Sender<bool>,
}

impl CallLifecycleController {
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaSource>,
        factory: Arc<dyn PeerConnectionFactory>,
        ice: IceTransportConfig,
    ) -> Self {
        let notifier = Notifier::new();
        let session = Arc::new(NegotiationSession::new(
            factory,
            Arc::clone(&channel),
            ice,
            notifier.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            session,
            router: Mutex::new(SignalingMessageRouter::new()),
            channel,
            media,
            notifier,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            shutdown,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Status-Stream für die UI
    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.notifier.watch()
    }

    pub fn current_status(&self) -> CallStatus {
        self.notifier.status()
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.notifier.subscribe()
    }

    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    pub async fn pending(&self) -> PendingCounts {
        self.router.lock().await.pending()
    }

    // ========================================================================
    // CALL CONTROL
    // ========================================================================

    /// Startet einen Call.
    ///
    /// Läuft bereits ein Start oder ein Call, passiert nichts. Schlägt die
    /// Media-Beschaffung fehl, bleibt alles unverändert und ein erneuter
    /// Aufruf ist möglich.
    pub async fn start_call(&self) -> Result<(), CallError> {
        if !self.session.try_begin_call() {
            tracing::debug!("Call already starting or active, ignoring start_call");
            return Ok(());
        }

        self.notifier.set_status(CallStatus::Connecting);

        let tracks = match self.media.acquire().await {
            Ok(tracks) => tracks,
            Err(e) => {
                self.session.clear_call_flag();
                let err = CallError::from(e);
                self.notifier.report(&err);
                return Err(err);
            }
        };

        // stop_call während der Media-Beschaffung
        if !self.session.is_call_in_progress() {
            tracing::info!("Call was stopped while acquiring media");
            tracks.stop();
            return Ok(());
        }

        self.notifier
            .emit(CallEvent::LocalStream(LocalStream::from(&tracks)));

        let mut router = self.router.lock().await;
        self.session.start(tracks).await?;
        self.notifier.set_status(CallStatus::InCall);

        router.drain_offers(&self.session).await;
        router.drain_answers(&self.session).await;

        Ok(())
    }

    /// Beendet den Call, verwirft gepufferte Nachrichten und gibt die
    /// lokalen Tracks frei. Ohne aktiven Call passiert nichts.
    pub async fn stop_call(&self) {
        let mut router = self.router.lock().await;
        router.clear();

        if self.session.close_all().await {
            tracing::info!("Call ended");
            self.notifier.set_status(CallStatus::Ended);
        } else {
            tracing::debug!("stop_call without active call");
        }
    }

    /// Verarbeitet ein einzelnes Event des Signaling-Kanals
    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                let status = if self.session.is_active().await {
                    CallStatus::InCall
                } else {
                    CallStatus::Connected
                };
                self.notifier.set_status(status);
            }
            ChannelEvent::Disconnected => {
                tracing::warn!("Signaling connection lost");
                self.notifier.set_status(CallStatus::Reconnecting);
            }
            ChannelEvent::Error(reason) => {
                self.notifier
                    .report(&CallError::Transport(SignalingError::Transport(reason)));
            }
            ChannelEvent::Message(message) => {
                let mut router = self.router.lock().await;
                router.route(&self.session, message).await;
            }
        }
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    /// Verbindet den Kanal und verarbeitet seine Events im Hintergrund
    pub fn spawn(self: &Arc<Self>) -> Result<CallGuard, CallError> {
        let events = self
            .channel
            .take_events()
            .ok_or(CallError::Transport(SignalingError::EventsTaken))?;

        let controller = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move { controller.run(events, shutdown).await });

        Ok(CallGuard {
            controller: Arc::clone(self),
            task: Some(task),
        })
    }

    async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = self.channel.connect().await {
            tracing::warn!("Initial signaling connect failed: {}", e);
            self.notifier.set_status(CallStatus::Reconnecting);
            if !self.reconnect(&mut shutdown).await {
                return;
            }
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(ChannelEvent::Disconnected) => {
                        self.handle_channel_event(ChannelEvent::Disconnected).await;
                        if !self.reconnect(&mut shutdown).await {
                            break;
                        }
                    }
                    Some(event) => self.handle_channel_event(event).await,
                    None => {
                        tracing::info!("Signaling event stream ended");
                        break;
                    }
                },
            }
        }

        tracing::debug!("Call controller loop stopped");
    }

    /// Versucht im festen Abstand neu zu verbinden, bis es klappt.
    ///
    /// Gibt `false` zurück, wenn vorher heruntergefahren wurde.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut attempt: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return false,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            attempt += 1;
            tracing::info!("Reconnecting to signaling server (attempt {})", attempt);

            match self.channel.connect().await {
                Ok(()) => return true,
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Geordnetes Herunterfahren: Call beenden, Kanal schließen
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.stop_call().await;
        self.channel.close();
    }

    /// Synchrones Herunterfahren für Drop-Pfade
    fn shutdown_now(&self) {
        self.shutdown.send_replace(true);
        if let Ok(mut router) = self.router.try_lock() {
            router.clear();
        }
        self.session.teardown_now();
        self.channel.close();
        self.notifier.set_status(CallStatus::Ended);
    }
}

// ============================================================================
// CALL GUARD
// ============================================================================

/// Hält den Event-Loop am Leben; beim Drop wird alles abgebaut
pub struct CallGuard {
    controller: Arc<CallLifecycleController>,
    task: Option<JoinHandle<()>>,
}

impl CallGuard {
    pub fn controller(&self) -> &Arc<CallLifecycleController> {
        &self.controller
    }

    pub async fn shutdown(mut self) {
        self.controller.shutdown().await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Call controller task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.controller.shutdown_now();
            task.abort();
        }
    }
}

impl std::ops::Deref for CallGuard {
    type Target = CallLifecycleController;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::handle::HandleState;
    use crate::call_engine::testing::{FakeChannel, FakeFactory, FakeMedia};
    use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage};

    struct Harness {
        controller: Arc<CallLifecycleController>,
        factory: Arc<FakeFactory>,
        channel: Arc<FakeChannel>,
        media: Arc<FakeMedia>,
    }

    fn harness() -> Harness {
        let factory = FakeFactory::new();
        let channel = FakeChannel::new();
        let media = FakeMedia::new();
        let controller = Arc::new(CallLifecycleController::new(
            channel.clone(),
            media.clone(),
            factory.clone(),
            IceTransportConfig::default(),
        ));
        Harness {
            controller,
            factory,
            channel,
            media,
        }
    }

    fn assert_one_interval(gap: Duration) {
        assert!(
            gap >= DEFAULT_RECONNECT_DELAY && gap < DEFAULT_RECONNECT_DELAY + Duration::from_millis(50),
            "unexpected reconnect gap {:?}",
            gap
        );
    }

    fn message(message: SignalingMessage) -> ChannelEvent {
        ChannelEvent::Message(message)
    }

    #[tokio::test]
    async fn test_start_call_creates_outbound_and_goes_in_call() {
        let h = harness();
        let mut events = h.controller.subscribe();

        h.controller.start_call().await.unwrap();

        assert_eq!(h.controller.current_status(), CallStatus::InCall);
        assert_eq!(h.factory.created(), 1);
        assert_eq!(h.channel.offers(), vec![SessionDescription::offer("O1")]);
        assert!(matches!(events.try_recv(), Ok(CallEvent::LocalStream(_))));
    }

    #[tokio::test]
    async fn test_concurrent_start_calls_create_one_outbound() {
        let h = harness();

        let (a, b) = tokio::join!(h.controller.start_call(), h.controller.start_call());
        a.unwrap();
        b.unwrap();

        assert_eq!(h.media.acquired().len(), 1);
        assert_eq!(h.factory.created(), 1);
        assert_eq!(h.channel.offers().len(), 1);
    }

    #[tokio::test]
    async fn test_media_failure_leaves_nothing_behind() {
        let h = harness();
        h.media.fail_next();

        let result = h.controller.start_call().await;

        assert!(matches!(result, Err(CallError::MediaAcquisition(_))));
        assert!(matches!(h.controller.current_status(), CallStatus::Error(_)));
        assert_eq!(h.factory.created(), 0);
        assert!(h.channel.emitted().is_empty());

        // Neuer Versuch ist erlaubt
        h.controller.start_call().await.unwrap();
        assert_eq!(h.factory.created(), 1);
    }

    #[tokio::test]
    async fn test_stop_then_start_keeps_at_most_two_connections() {
        let h = harness();

        h.controller.start_call().await.unwrap();
        h.controller
            .handle_channel_event(message(SignalingMessage::Offer(SessionDescription::offer(
                "O1",
            ))))
            .await;
        assert_eq!(h.factory.open_peers(), 2);

        h.controller.stop_call().await;
        assert_eq!(h.controller.current_status(), CallStatus::Ended);
        assert_eq!(h.factory.open_peers(), 0);
        assert!(h.media.acquired()[0].is_stopped());

        h.controller.start_call().await.unwrap();
        h.controller
            .handle_channel_event(message(SignalingMessage::Offer(SessionDescription::offer(
                "O2",
            ))))
            .await;

        assert_eq!(h.factory.open_peers(), 2);
        assert_eq!(h.controller.session().live_handles().await, 2);
    }

    #[tokio::test]
    async fn test_stop_without_call_is_a_noop() {
        let h = harness();

        h.controller.stop_call().await;

        assert_eq!(h.controller.current_status(), CallStatus::Idle);
        assert_eq!(h.factory.created(), 0);
    }

    #[tokio::test]
    async fn test_stop_discards_queued_messages() {
        let h = harness();
        h.controller
            .handle_channel_event(message(SignalingMessage::Offer(SessionDescription::offer(
                "stale",
            ))))
            .await;
        h.controller
            .handle_channel_event(message(SignalingMessage::IceCandidate(IceCandidate::new(
                "c1",
            ))))
            .await;

        h.controller.stop_call().await;
        assert_eq!(h.controller.pending().await, PendingCounts::default());

        h.controller.start_call().await.unwrap();
        assert!(h.channel.answers().is_empty());
        assert_eq!(h.controller.session().inbound_state().await, None);
    }

    #[tokio::test]
    async fn test_start_call_replays_queued_offer() {
        let h = harness();
        h.controller
            .handle_channel_event(message(SignalingMessage::Offer(SessionDescription::offer(
                "O1",
            ))))
            .await;
        assert_eq!(h.controller.pending().await.offers, 1);

        h.controller.start_call().await.unwrap();

        assert_eq!(h.controller.pending().await.offers, 0);
        assert_eq!(h.channel.answers(), vec![SessionDescription::answer("A1")]);
        assert_eq!(
            h.controller.session().inbound_state().await,
            Some(HandleState::AnswerSent)
        );
    }

    #[tokio::test]
    async fn test_channel_status_projection() {
        let h = harness();

        h.controller.handle_channel_event(ChannelEvent::Connected).await;
        assert_eq!(h.controller.current_status(), CallStatus::Connected);

        h.controller
            .handle_channel_event(ChannelEvent::Disconnected)
            .await;
        assert_eq!(h.controller.current_status(), CallStatus::Reconnecting);

        h.controller.start_call().await.unwrap();
        h.controller.handle_channel_event(ChannelEvent::Connected).await;
        assert_eq!(h.controller.current_status(), CallStatus::InCall);

        h.controller
            .handle_channel_event(ChannelEvent::Error("boom".into()))
            .await;
        assert_eq!(
            h.controller.current_status(),
            CallStatus::Error("Signaling transport error: WebSocket error: boom".into())
        );
    }

    #[tokio::test]
    async fn test_two_party_call_reaches_connected() {
        let caller = harness();
        let callee = harness();

        callee.controller.start_call().await.unwrap();
        caller.controller.start_call().await.unwrap();

        // Caller-Offer zum Callee
        let offer = caller.channel.offers()[0].clone();
        assert_eq!(offer.sdp, "O1");
        callee
            .controller
            .handle_channel_event(message(SignalingMessage::Offer(offer)))
            .await;

        let answer = callee.channel.answers()[0].clone();
        assert_eq!(answer.sdp, "A1");
        assert_eq!(
            callee.controller.session().inbound_state().await,
            Some(HandleState::AnswerSent)
        );

        // Answer zurück zum Caller
        caller
            .controller
            .handle_channel_event(message(SignalingMessage::Answer(answer)))
            .await;

        assert_eq!(
            caller.controller.session().outbound_state().await,
            Some(HandleState::Connected)
        );
        assert_eq!(
            caller.factory.peer(0).remote_description(),
            Some(SessionDescription::answer("A1"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_at_fixed_interval_until_success() {
        let h = harness();
        let guard = h.controller.spawn().unwrap();

        while h.controller.current_status() != CallStatus::Connected {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(h.channel.connect_attempts().len(), 1);

        h.channel.fail_connects(3);
        let lost_at = tokio::time::Instant::now();
        h.channel.inject(ChannelEvent::Disconnected);

        while h.channel.connect_attempts().len() < 5
            || h.controller.current_status() != CallStatus::Connected
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let attempts = h.channel.connect_attempts();
        assert_eq!(attempts.len(), 5);
        assert_one_interval(attempts[1] - lost_at);
        for pair in attempts[1..].windows(2) {
            assert_one_interval(pair[1] - pair[0]);
        }

        guard.shutdown().await;
        assert!(h.channel.is_closed());
    }

    #[tokio::test]
    async fn test_spawn_twice_fails() {
        let h = harness();
        let guard = h.controller.spawn().unwrap();

        assert!(matches!(
            h.controller.spawn(),
            Err(CallError::Transport(SignalingError::EventsTaken))
        ));

        guard.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_guard_tears_everything_down() {
        let h = harness();
        let guard = h.controller.spawn().unwrap();
        guard.start_call().await.unwrap();
        assert_eq!(h.factory.open_peers(), 1);

        drop(guard);
        // Close-Tasks laufen lassen
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(h.channel.is_closed());
        assert_eq!(h.factory.open_peers(), 0);
        assert!(h.media.acquired()[0].is_stopped());
        assert_eq!(h.controller.current_status(), CallStatus::Ended);
        assert!(!h.controller.session().is_active().await);
    }
}
