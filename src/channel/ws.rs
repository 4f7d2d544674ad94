use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::socket::{ConnectionId, RawMessage, Transport, TransportEvent};

/// Callback used by the transport to report events back to its owner
pub type TransportEmitter = Arc<dyn Fn(TransportEvent) + Send + Sync>;

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

/// Websocket transport: one tokio task per physical connection
pub struct WsTransport {
    emit: TransportEmitter,
    connections: HashMap<ConnectionId, Connection>,
}

impl WsTransport {
    pub fn new(emit: TransportEmitter) -> Self {
        Self {
            emit,
            connections: HashMap::new(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: ConnectionId, url: &str) {
        self.connections.retain(|_, c| !c.task.is_finished());

        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(id, url.to_string(), rx, Arc::clone(&self.emit)));
        self.connections.insert(id, Connection { outbound, task });
    }

    fn send(&mut self, id: ConnectionId, frame: Vec<u8>) {
        match self.connections.get(&id) {
            Some(conn) => {
                if conn.outbound.send(Outbound::Frame(frame)).is_err() {
                    warn!("Connection {} already finished, frame dropped", id);
                }
            }
            None => warn!("No connection {}, frame dropped", id),
        }
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.remove(&id) {
            // Picked up after the handshake if still connecting
            let _ = conn.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, conn) in self.connections.drain() {
            conn.task.abort();
        }
    }
}

async fn run_connection(
    id: ConnectionId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    emit: TransportEmitter,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("Connection {} failed: {}", id, e);
            emit(TransportEvent::Closed {
                id,
                reason: Some(e.to_string()),
            });
            return;
        }
    };

    emit(TransportEvent::Opened(id));
    let (mut sink, mut stream) = ws.split();
    let mut reason = None;

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Frame(bytes)) => {
                    let len = bytes.len();
                    if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                        reason = Some(e.to_string());
                        break;
                    }
                    debug!("Connection {} sent frame of {} bytes", id, len);
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportEvent::Message(id, RawMessage::Text(text.to_string())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    emit(TransportEvent::Message(id, RawMessage::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    reason = Some(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    info!("Connection {} task finished", id);
    emit(TransportEvent::Closed { id, reason });
}
