use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What the coordinator should push to a single connection.
#[derive(Debug)]
enum Outbound {
    Message(Message),
    /// Send a close frame with this code, then hang up.
    Close(u16),
    /// Hang up without a close frame (client sees 1006).
    Drop,
}

#[derive(Default)]
struct CoordinatorState {
    next_ids: VecDeque<String>,
    connections: u32,
    clients: BTreeMap<String, mpsc::UnboundedSender<Outbound>>,
    received: Vec<(String, Value)>,
}

impl CoordinatorState {
    fn send_to(&self, id: &str, value: Value) {
        if let Some(tx) = self.clients.get(id) {
            let _ = tx.send(Outbound::Message(Message::Text(value.to_string())));
        }
    }
}

/// In-process room coordinator speaking the JSON room protocol.
///
/// Client ids are handed out in the order given to [`MockCoordinator::start`],
/// then as `client-<n>`.
pub struct MockCoordinator {
    addr: SocketAddr,
    state: Arc<Mutex<CoordinatorState>>,
    accept_task: JoinHandle<()>,
}

impl MockCoordinator {
    pub async fn start(ids: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(Mutex::new(CoordinatorState {
            next_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of WebSocket connections accepted so far.
    pub fn connections(&self) -> u32 {
        self.state.lock().connections
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.state.lock().clients.keys().cloned().collect()
    }

    /// All messages clients sent, with the sender id.
    pub fn received(&self) -> Vec<(String, Value)> {
        self.state.lock().received.clone()
    }

    /// Push a raw text frame to a client.
    pub fn push_raw(&self, id: &str, text: &str) {
        if let Some(tx) = self.state.lock().clients.get(id) {
            let _ = tx.send(Outbound::Message(Message::Text(text.to_string())));
        }
    }

    /// Close a client's connection with the given close code.
    pub fn close(&self, id: &str, code: u16) {
        if let Some(tx) = self.state.lock().clients.get(id) {
            let _ = tx.send(Outbound::Close(code));
        }
    }

    /// Stop the listener; new connection attempts are refused from now on.
    /// Connections already accepted keep running.
    pub async fn stop_accepting(&mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }

    /// Drop a client's TCP connection without a close frame.
    pub fn drop_connection(&self, id: &str) {
        if let Some(tx) = self.state.lock().clients.get(id) {
            let _ = tx.send(Outbound::Drop);
        }
    }
}

impl Drop for MockCoordinator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<CoordinatorState>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let id = {
        let mut state = state.lock();
        state.connections += 1;
        let id = match state.next_ids.pop_front() {
            Some(id) => id,
            None => format!("client-{}", state.connections),
        };

        let existing: Vec<String> = state.clients.keys().cloned().collect();
        for peer in &existing {
            state.send_to(peer, json!({ "type": "new-peer", "clientId": id }));
        }

        state.clients.insert(id.clone(), tx);
        state.send_to(
            &id,
            json!({
                "type": "join",
                "clientId": id,
                "existingClients": existing,
                "roomId": "test-room",
            }),
        );
        id
    };

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Message(msg)) => {
                    if write.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "closed by coordinator".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
                Some(Outbound::Drop) | None => break,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => relay(&state, &id, &text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let mut state = state.lock();
    state.clients.remove(&id);
    let remaining: Vec<String> = state.clients.keys().cloned().collect();
    for peer in remaining {
        state.send_to(&peer, json!({ "type": "peer-left", "clientId": id }));
    }
}

/// Forwards directed messages to `to`, stamping `from`.
fn relay(state: &Mutex<CoordinatorState>, from: &str, text: &str) {
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        return;
    };

    let mut state = state.lock();
    state.received.push((from.to_string(), value.clone()));

    let Some(to) = value.get("to").and_then(Value::as_str).map(str::to_owned) else {
        return;
    };
    value["from"] = json!(from);
    state.send_to(&to, value);
}
