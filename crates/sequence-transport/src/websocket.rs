//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::COOKIE;

use crate::{ConnectRequest, Connection, ConnectionId, ConnectionLimits, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    limits: ConnectionLimits,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str, limits: ConnectionLimits) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener, limits })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl WebSocketTransport {
    /// Accepts the next TCP connection without upgrading it.
    ///
    /// The WebSocket handshake runs later in
    /// [`PendingConnection::handshake`], so an accept loop can hand it to a
    /// spawned task and go straight back to the listener.
    pub async fn accept_pending(&mut self) -> Result<PendingConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        Ok(PendingConnection {
            stream,
            addr,
            limits: self.limits,
        })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.accept_pending().await?.handshake().await
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A TCP connection whose WebSocket upgrade has not happened yet.
pub struct PendingConnection {
    stream: TcpStream,
    addr: SocketAddr,
    limits: ConnectionLimits,
}

impl PendingConnection {
    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Performs the WebSocket upgrade, capturing the request.
    ///
    /// A peer that does not finish the upgrade within the read deadline
    /// gets [`TransportError::TimedOut`].
    pub async fn handshake(self) -> Result<WebSocketConnection, TransportError> {
        let Self {
            stream,
            addr,
            limits,
        } = self;

        let mut request = ConnectRequest::default();
        let upgrade = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                request = ConnectRequest::parse(
                    req.uri().path(),
                    req.uri().query(),
                    req.headers()
                        .get_all(COOKIE)
                        .iter()
                        .filter_map(|v| v.to_str().ok()),
                );
                Ok(resp)
            },
        );
        let ws = tokio::time::timeout(limits.read_timeout, upgrade)
            .await
            .map_err(|_| TransportError::TimedOut)?
            .map_err(|e| {
                TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, path = request.path(), "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            request,
            limits,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// A single WebSocket connection.
///
/// The socket is split into its write and read halves, each behind its
/// own lock, so a task blocked in `recv` never holds up `send`.
pub struct WebSocketConnection {
    id: ConnectionId,
    request: ConnectRequest,
    limits: ConnectionLimits,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    async fn write(&self, msg: Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(self.limits.write_timeout, sink.send(msg))
            .await
            .map_err(|_| TransportError::TimedOut)?
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
            })
    }

    fn check_size(&self, data: Vec<u8>) -> Result<Option<Vec<u8>>, TransportError> {
        if data.len() > self.limits.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: data.len(),
                limit: self.limits.max_message_size,
            });
        }
        Ok(Some(data))
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        // Browsers consume JSON as text frames.
        let msg = match String::from_utf8(data.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        self.write(msg).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::time::timeout(self.limits.read_timeout, stream.next())
                .await
                .map_err(|_| TransportError::TimedOut)?;
            match next {
                Some(Ok(Message::Text(text))) => {
                    return self.check_size(text.as_bytes().to_vec());
                }
                Some(Ok(Message::Binary(data))) => {
                    return self.check_size(data.to_vec());
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // ping/pong/raw frames only refresh the read deadline
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.write(Message::Ping(Vec::<u8>::new().into())).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(self.limits.write_timeout, sink.close())
            .await
            .map_err(|_| TransportError::TimedOut)?
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
            })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn request(&self) -> &ConnectRequest {
        &self.request
    }
}
