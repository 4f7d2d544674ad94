use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{parse_text, InboundEvent};

/// Lifecycle of the voice socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Generation number of one physical connection
pub type ConnectionId = u64;

/// Raw websocket message before demultiplexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Events reported by a transport, tagged with the connection they belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened(ConnectionId),
    Message(ConnectionId, RawMessage),
    /// Remote close or socket error
    Closed {
        id: ConnectionId,
        reason: Option<String>,
    },
}

/// Physical connection driver
///
/// Every call returns immediately; outcomes come back as `TransportEvent`s.
pub trait Transport: Send {
    fn open(&mut self, id: ConnectionId, url: &str);
    fn send(&mut self, id: ConnectionId, frame: Vec<u8>);
    fn close(&mut self, id: ConnectionId);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("socket is {0:?}, frames can only be sent while connected")]
    NotConnected(ConnectionState),

    #[error("an API key is required to connect")]
    MissingApiKey,
}

/// Owns the connection state machine on top of a `Transport`
pub struct SocketChannel {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    target: Option<String>,
    current: Option<ConnectionId>,
    next_id: ConnectionId,
}

impl SocketChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            target: None,
            current: None,
            next_id: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether a connection to `url` is already open or opening
    pub fn is_active_for(&self, url: &str) -> bool {
        self.state != ConnectionState::Disconnected && self.target.as_deref() == Some(url)
    }

    /// Open a connection to `url`
    ///
    /// Returns false when the same target is already connecting/connected.
    /// A different target replaces the current connection.
    pub fn connect(&mut self, url: &str) -> bool {
        if self.is_active_for(url) {
            info!("Socket already {:?} to this target", self.state);
            return false;
        }

        if self.state != ConnectionState::Disconnected {
            info!("Closing existing connection for new target");
            self.close();
        }

        let id = self.next_id;
        self.next_id += 1;
        self.current = Some(id);
        self.target = Some(url.to_string());
        self.state = ConnectionState::Connecting;
        self.transport.open(id, url);
        info!("Connecting socket (connection {})", id);
        true
    }

    /// Transport opened; true if this moved the current connection to Connected
    pub fn on_open(&mut self, id: ConnectionId) -> bool {
        if self.current != Some(id) || self.state != ConnectionState::Connecting {
            debug!("Ignoring open of stale connection {}", id);
            return false;
        }
        self.state = ConnectionState::Connected;
        info!("Socket connection {} established", id);
        true
    }

    /// Transport closed; true exactly once per connection that was still current
    pub fn on_closed(&mut self, id: ConnectionId, reason: Option<&str>) -> bool {
        if self.current != Some(id) {
            debug!("Ignoring close of stale connection {}", id);
            return false;
        }
        match reason {
            Some(reason) => warn!("Socket connection {} closed: {}", id, reason),
            None => info!("Socket connection {} closed", id),
        }
        self.reset();
        true
    }

    /// Close locally; true if a connection was open or opening
    pub fn close(&mut self) -> bool {
        match self.current.take() {
            Some(id) => {
                self.transport.close(id);
                self.reset();
                info!("Socket connection {} closed locally", id);
                true
            }
            None => false,
        }
    }

    fn reset(&mut self) {
        self.current = None;
        self.target = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Fire-and-forget send of one binary frame
    pub fn send(&mut self, frame: Vec<u8>) -> Result<(), ChannelError> {
        match (self.state, self.current) {
            (ConnectionState::Connected, Some(id)) => {
                self.transport.send(id, frame);
                Ok(())
            }
            (state, _) => Err(ChannelError::NotConnected(state)),
        }
    }

    /// Turn a raw message of connection `id` into an inbound event
    ///
    /// Stale connections and malformed text are logged and dropped.
    pub fn demux(&mut self, id: ConnectionId, message: RawMessage) -> Option<InboundEvent> {
        if self.current != Some(id) || self.state != ConnectionState::Connected {
            debug!("Dropping message from stale connection {}", id);
            return None;
        }

        match message {
            RawMessage::Binary(bytes) => Some(InboundEvent::AudioChunk { bytes }),
            RawMessage::Text(text) => match parse_text(&text) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping malformed message: {}", e);
                    None
                }
            },
        }
    }
}
