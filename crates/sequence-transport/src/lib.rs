//! Transport abstraction layer for the Sequence lobby server.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the network protocol, plus [`ConnectRequest`], the parts of the upgrade
//! request (path, query string, cookies) the session layer needs to know
//! who is connecting and to which lobby.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
mod request;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use request::ConnectRequest;
#[cfg(feature = "websocket")]
pub use websocket::{PendingConnection, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Deadlines and size limits applied to every accepted connection.
///
/// The read deadline is reset by every frame the peer sends, pongs
/// included, so a peer answering pings never times out. A half-open TCP
/// connection is reclaimed once `read_timeout` passes without traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Longest silence tolerated from the peer.
    pub read_timeout: Duration,
    /// Longest time a single write may take.
    pub write_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_size: 512,
        }
    }
}

/// Accepts new incoming connections.
///
/// Methods return `Send` futures so connection handling can be spawned
/// onto the multi-threaded runtime from generic code.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A single connection that can send and receive messages.
///
/// Sending and receiving are independent: one task may sit in
/// [`recv`](Connection::recv) while another calls
/// [`send`](Connection::send) on the same connection.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one message to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Sends a keepalive ping. The peer's answer resets the read deadline.
    fn ping(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the upgrade request this connection was opened with.
    fn request(&self) -> &ConnectRequest;
}
