//! WebSocket Client für den Raum-Koordinator
//!
//! Verwaltet die Steuerverbindung zum Koordinator:
//! - Automatische Reconnection mit exponentiellem Backoff
//! - Membership-Nachrichten direkt auf die `RoomSession` anwenden
//! - Genau ein Handler pro Nachrichtenart (`subscribe`/`unsubscribe`)
//! - Event-basierte Statusmeldungen

use super::backoff::ReconnectPolicy;
use super::messages::*;
use super::output::SignalingOutput;
use crate::room::{ConnectionStatus, MembershipTracker, MembershipUpdate, PeerSetChange, RoomSession};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to room coordinator")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingChannel ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Verbindungsstatus hat sich geändert
    StatusChanged(ConnectionStatus),

    /// Join bestätigt (auch bei Resync nach Reconnect)
    Joined { self_id: String, peers: Vec<String> },

    /// Peer-Menge hat sich geändert
    PeersChanged(PeerSetChange),

    /// Reconnect ist geplant
    ReconnectScheduled { attempt: u32, delay: Duration },

    /// Reconnect-Budget erschöpft
    ReconnectFailed { attempts: u32 },
}

/// Handler für eine Nachrichtenart, wird synchron beim Empfang aufgerufen
pub type MessageHandler = Arc<dyn Fn(&SignalingMessage) + Send + Sync>;

/// Wie eine einzelne Verbindung geendet hat
#[derive(Debug)]
enum Closed {
    /// Lokal per `disconnect()`
    Intentional,
    /// Vom Koordinator mit Code 1000 beendet
    ByCoordinator,
    /// Alles andere, löst Reconnect aus
    Abnormal(SignalingError),
}

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

struct ChannelInner {
    url: Url,
    policy: ReconnectPolicy,
    tracker: MembershipTracker,
    handlers: RwLock<HashMap<MessageKind, MessageHandler>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    shutdown_tx: watch::Sender<bool>,
    attempts: AtomicU32,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Steuerverbindung zum Raum-Koordinator
///
/// Günstig zu klonen, alle Klone teilen sich dieselbe Verbindung.
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

impl SignalingChannel {
    /// Erstellt einen neuen Kanal für die Raum-URL (`.../ws/rooms/<roomId>`)
    pub fn new(url: Url, policy: ReconnectPolicy, session: Arc<RwLock<RoomSession>>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ChannelInner {
                url,
                policy,
                tracker: MembershipTracker::new(session),
                handlers: RwLock::new(HashMap::new()),
                outbound: Mutex::new(None),
                event_tx,
                shutdown_tx,
                attempts: AtomicU32::new(0),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Registriert den Handler für eine Nachrichtenart (ersetzt einen vorhandenen)
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&SignalingMessage) + Send + Sync + 'static,
    {
        let previous = self.inner.handlers.write().insert(kind, Arc::new(handler));
        if previous.is_some() {
            tracing::debug!("Replaced handler for {} messages", kind);
        }
    }

    /// Entfernt den Handler für eine Nachrichtenart
    pub fn unsubscribe(&self, kind: MessageKind) {
        self.inner.handlers.write().remove(&kind);
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn session(&self) -> &Arc<RwLock<RoomSession>> {
        self.inner.tracker.session()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session().read().connection_status()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Gibt die zugewiesene Client-ID zurück (falls beigetreten)
    pub fn self_id(&self) -> Option<String> {
        self.session().read().self_id().map(str::to_owned)
    }

    pub fn peer_ids(&self) -> BTreeSet<String> {
        self.session().read().peer_ids().clone()
    }

    /// Anzahl der Reconnect-Versuche seit der letzten erfolgreichen Verbindung
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Baut die Verbindung auf und hält sie (inkl. Reconnect) im Hintergrund
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden. Ein zweiter
    /// Aufruf bei laufender Verbindung ist ein No-op.
    pub fn connect(&self) {
        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("Signaling channel already running");
            return;
        }

        self.inner.shutdown_tx.send_replace(false);
        self.inner.attempts.store(0, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        *supervisor = Some(tokio::spawn(async move { inner.supervise().await }));
    }

    /// Trennt absichtlich (Close-Code 1000) und bricht geplante Reconnects ab
    pub async fn disconnect(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let task = self.inner.supervisor.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Signaling task ended abnormally: {}", e);
            }
        }

        self.inner.outbound.lock().take();
        self.inner.end_session();
        self.inner.set_status(ConnectionStatus::Disconnected);
        tracing::info!("Disconnected from room coordinator");
    }

    /// Sendet eine Nachricht; `false` wenn gerade nicht verbunden
    pub fn send(&self, message: &SignalingMessage) -> bool {
        match self.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping outgoing {} message: {}", message.kind(), e);
                false
            }
        }
    }

    /// Wie [`send`](Self::send), liefert aber den Grund des Fehlschlags
    pub fn try_send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let outbound = self.inner.outbound.lock();
        let tx = outbound.as_ref().ok_or(SignalingError::NotConnected)?;

        let json =
            serde_json::to_string(message).map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.send(Message::Text(json))
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

impl SignalingOutput for SignalingChannel {
    fn send_signal(&self, message: SignalingMessage) -> bool {
        self.send(&message)
    }
}

impl ChannelInner {
    /// Verbindungsschleife inkl. Backoff, läuft bis `disconnect()` oder Aufgabe
    async fn supervise(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        self.set_status(ConnectionStatus::Connecting);

        loop {
            let reason = match self.run_connection(&mut shutdown).await {
                Closed::Intentional => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                Closed::ByCoordinator => {
                    self.end_session();
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                Closed::Abnormal(reason) => reason,
            };

            if *shutdown.borrow() {
                self.set_status(ConnectionStatus::Disconnected);
                return;
            }

            let attempts = self.attempts.load(Ordering::SeqCst);
            let Some(delay) = self.policy.next_delay(attempts) else {
                tracing::error!(
                    "Failed to reconnect after {} attempt(s), giving up",
                    attempts
                );
                self.set_status(ConnectionStatus::Error);
                let _ = self
                    .event_tx
                    .send(SignalingEvent::ReconnectFailed { attempts });
                return;
            };

            let attempt = attempts + 1;
            self.attempts.store(attempt, Ordering::SeqCst);

            tracing::warn!(
                "{}; reconnecting in {:?} (attempt {}/{})",
                reason,
                delay,
                attempt,
                self.policy.max_attempts
            );
            self.set_status(ConnectionStatus::Reconnecting);
            let _ = self
                .event_tx
                .send(SignalingEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    tracing::debug!("Pending reconnect cancelled");
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
            }
        }
    }

    /// Eine einzelne WebSocket-Verbindung vom Aufbau bis zum Schließen
    async fn run_connection(&self, shutdown: &mut watch::Receiver<bool>) -> Closed {
        tracing::info!("Connecting to room coordinator: {}", self.url);

        let ws_stream = tokio::select! {
            res = connect_async(self.url.as_str()) => match res {
                Ok((ws_stream, _)) => ws_stream,
                Err(e) => return Closed::Abnormal(SignalingError::ConnectionFailed(e.to_string())),
            },
            _ = shutdown_requested(shutdown) => return Closed::Intentional,
        };

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock() = Some(tx);

        self.attempts.store(0, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Connected);
        tracing::info!("WebSocket connected to {}", self.url);

        let closed = loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "Client disconnecting".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Close frame not delivered: {}", e);
                    }
                    break Closed::Intentional;
                }

                Some(msg) = rx.recv() => {
                    if let Err(e) = write.send(msg).await {
                        tracing::error!("Failed to send WebSocket message: {}", e);
                        break Closed::Abnormal(SignalingError::SendFailed(e.to_string()));
                    }
                }

                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        tracing::info!("WebSocket closed by coordinator: {:?}", frame);
                        if code == Some(CloseCode::Normal) {
                            break Closed::ByCoordinator;
                        }
                        let code = code.map_or(1005, u16::from);
                        break Closed::Abnormal(SignalingError::ConnectionLost(format!(
                            "close code {code}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break Closed::Abnormal(SignalingError::ConnectionLost(e.to_string()));
                    }
                    None => {
                        break Closed::Abnormal(SignalingError::ConnectionLost(
                            "stream ended without close frame".to_string(),
                        ));
                    }
                },
            }
        };

        self.outbound.lock().take();
        closed
    }

    /// Vergisst Identität und Peers; meldet die entfernten Peers
    fn end_session(&self) {
        let removed: Vec<String> = {
            let mut session = self.tracker.session().write();
            let removed = session.peer_ids().iter().cloned().collect();
            session.clear();
            removed
        };

        if !removed.is_empty() {
            let _ = self.event_tx.send(SignalingEvent::PeersChanged(PeerSetChange {
                added: Vec::new(),
                removed,
            }));
        }
    }

    /// Verarbeitet eine eingehende Text-Nachricht
    fn dispatch(&self, text: &str) {
        let msg = match serde_json::from_str::<SignalingMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Ignoring malformed coordinator message: {}", e);
                return;
            }
        };

        tracing::debug!("Received {} message", msg.kind());

        // Membership zuerst, damit Handler bereits die neue Peer-Menge sehen
        match self.tracker.apply(&msg) {
            Some(MembershipUpdate::Joined { self_id, .. }) => {
                let peers = self.tracker.session().read().peer_ids().iter().cloned().collect();
                let _ = self.event_tx.send(SignalingEvent::Joined { self_id, peers });
            }
            Some(MembershipUpdate::PeersChanged(change)) => {
                let _ = self.event_tx.send(SignalingEvent::PeersChanged(change));
            }
            None => {}
        }

        let handler = self.handlers.read().get(&msg.kind()).cloned();
        if let Some(handler) = handler {
            handler(&msg);
        }
    }

    /// Aktualisiert den Status und sendet Event (nur bei Änderung)
    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut session = self.tracker.session().write();
            if session.connection_status() == status {
                false
            } else {
                session.set_connection_status(status);
                true
            }
        };

        if changed {
            tracing::debug!("Signaling status: {}", status);
            let _ = self.event_tx.send(SignalingEvent::StatusChanged(status));
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("url", &self.inner.url.as_str())
            .field("session", &*self.session().read())
            .finish()
    }
}

/// Wartet auf `disconnect()`; der `watch::Ref` (nicht `Send`) wird sofort verworfen
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
