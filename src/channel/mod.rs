//! Bidirectional socket to the voice service

pub mod socket;
pub mod ws;

pub use socket::{
    ChannelError, ConnectionId, ConnectionState, RawMessage, SocketChannel, Transport,
    TransportEvent,
};
pub use ws::{TransportEmitter, WsTransport};
