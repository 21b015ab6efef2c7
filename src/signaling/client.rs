//! WebSocket Client für den Signaling-Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay-Server:
//! - Getrennte Read-/Write-Tasks pro Verbindung
//! - Raum-Beitritt nach jedem Verbindungsaufbau
//! - Event-basierte Kommunikation über einen einzigen Event-Stream
//!
//! Die Reconnection-Policy liegt nicht hier, sondern beim
//! `CallLifecycleController`, der auf `ChannelEvent::Disconnected` reagiert.

use super::channel::{ChannelEvent, SignalingChannel, SignalingError};
use super::messages::{Envelope, EventName, SignalingMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Größe der ausgehenden Queue pro Verbindung
const OUTBOUND_QUEUE_SIZE: usize = 100;

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    /// Bewusst geschlossen, kein Disconnected-Event mehr
    closing: bool,
    /// Zählt Verbindungen, damit alte Read-Tasks nichts mehr melden
    connection_id: u64,
}

// ============================================================================
// WEBSOCKET SIGNALING CHANNEL
// ============================================================================

/// WebSocket-Implementierung von [`SignalingChannel`]
pub struct WsSignalingChannel {
    server_url: String,
    room: Option<String>,
    state: Arc<RwLock<ClientState>>,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl WsSignalingChannel {
    /// Erstellt einen neuen Kanal, verbindet aber noch nicht
    pub fn new(server_url: impl Into<String>, room: Option<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            server_url: server_url.into(),
            room,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Legt einen fertigen Frame in die Write-Queue (non-blocking)
    fn send_raw(&self, frame: String) -> Result<(), SignalingError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(SignalingError::NotConnected)?;

        tx.try_send(frame)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    fn send_envelope(&self, envelope: &Envelope) -> Result<(), SignalingError> {
        let frame = serde_json::to_string(envelope)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
        self.send_raw(frame)
    }

    /// Verarbeitet einen eingehenden Text-Frame
    fn handle_frame(text: &str, event_tx: &mpsc::UnboundedSender<ChannelEvent>) {
        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping unparsable signaling frame: {}", e);
                return;
            }
        };

        let Some(event) = EventName::parse(&envelope.event) else {
            tracing::warn!("Dropping unknown signaling event '{}'", envelope.event);
            return;
        };

        match SignalingMessage::from_event(event, envelope.payload) {
            Ok(Some(message)) => {
                tracing::debug!("Received '{}' from relay", event);
                let _ = event_tx.send(ChannelEvent::Message(message));
            }
            Ok(None) => {
                tracing::debug!("Ignoring inbound '{}' event", event);
            }
            Err(e) => {
                tracing::warn!("Dropping malformed '{}' payload: {}", event, e);
            }
        }
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn connect(&self) -> Result<(), SignalingError> {
        tracing::info!("Connecting to signaling server: {}", self.server_url);

        let (ws_stream, _) = connect_async(self.server_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        // Reste einer früheren Verbindung entsorgen
        self.abort_tasks();

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_SIZE);

        let connection_id = {
            let mut state = self.state.write();
            state.connection_id += 1;
            state.is_connected = true;
            state.closing = false;
            state.connection_id
        };

        // Read-Task starten
        let state_clone = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => Self::handle_frame(&text, &event_tx),
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                    _ => {}
                }
            }

            // Disconnect nur melden, wenn diese Verbindung noch aktuell ist
            let report = {
                let mut state = state_clone.write();
                if state.connection_id == connection_id {
                    state.is_connected = false;
                    !state.closing
                } else {
                    false
                }
            };
            if report {
                let _ = event_tx.send(ChannelEvent::Disconnected);
            }
        });

        // Write-Task starten
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        *self.tx.lock() = Some(tx);
        self.tasks.lock().extend([reader, writer]);

        let _ = self.event_tx.send(ChannelEvent::Connected);

        if let Some(room) = &self.room {
            tracing::info!("Joining room '{}'", room);
            self.send_envelope(&Envelope::new(
                EventName::JoinRoom,
                serde_json::Value::String(room.clone()),
            ))?;
        }

        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.event_rx.lock().take()
    }

    fn emit(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let envelope =
            Envelope::from_message(message).map_err(|e| SignalingError::Malformed(e.to_string()))?;
        tracing::debug!("Emitting '{}'", envelope.event);
        self.send_envelope(&envelope)
    }

    fn close(&self) {
        {
            let mut state = self.state.write();
            state.closing = true;
            state.is_connected = false;
        }

        // Sender droppen beendet den Write-Task samt Close-Frame
        if self.tx.lock().take().is_some() {
            tracing::info!("Closing signaling channel");
        }

        // Der Read-Task hängt am Socket, deshalb hart abbrechen
        let mut tasks = self.tasks.lock();
        if let Some(reader) = tasks.first() {
            reader.abort();
        }
        tasks.clear();
    }

    fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }
}

impl Drop for WsSignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WsSignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSignalingChannel")
            .field("server_url", &self.server_url)
            .field("room", &self.room)
            .field("state", &*self.state.read())
            .finish()
    }
}
