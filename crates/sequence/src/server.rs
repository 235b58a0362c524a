//! `SequenceServer` builder, accept loop and the handle the HTTP layer
//! uses to manage lobbies.
//!
//! This ties the layers together: transport → session → store ← lobby.

use std::sync::Arc;
use std::time::Duration;

use sequence_lobby::{GameEngine, LobbyConfig, LobbyInfo, LobbyManager};
use sequence_protocol::{LobbyCode, Settings};
use sequence_session::{Authenticator, SessionConfig};
use sequence_store::{MemoryStore, StateStore};
use sequence_transport::WebSocketTransport;
use tokio::sync::Mutex;

use crate::SequenceError;
use crate::handler::handle_connection;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:42069";

/// Path of the lobby WebSocket endpoint.
pub const LOBBY_PATH: &str = "/lobby/ws";

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<S: StateStore, G: GameEngine, A: Authenticator> {
    pub(crate) store: S,
    pub(crate) lobbies: Arc<Mutex<LobbyManager<S, G>>>,
    pub(crate) auth: A,
    pub(crate) session_config: SessionConfig,
}

/// Builder for configuring and starting a Sequence server.
///
/// # Example
///
/// ```rust,no_run
/// use sequence::prelude::*;
///
/// # async fn run() -> Result<(), SequenceError> {
/// let server = SequenceServerBuilder::new()
///     .bind("0.0.0.0:42069")
///     .build::<OpeningTable, _>(CookieAuthenticator::default())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct SequenceServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    lobby_config: LobbyConfig,
    reap_interval: Duration,
}

impl SequenceServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            session_config: SessionConfig::default(),
            lobby_config: LobbyConfig::default(),
            reap_interval: Duration::from_secs(60),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the configuration every lobby runs with.
    pub fn lobby_config(mut self, config: LobbyConfig) -> Self {
        self.lobby_config = config;
        self
    }

    /// How often stopped lobbies are dropped from the registry.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Binds the server on a fresh in-memory store.
    pub async fn build<G: GameEngine, A: Authenticator>(
        self,
        auth: A,
    ) -> Result<SequenceServer<MemoryStore, G, A>, SequenceError> {
        self.build_with_store(MemoryStore::new(), auth).await
    }

    /// Binds the server on top of an existing store.
    pub async fn build_with_store<S: StateStore, G: GameEngine, A: Authenticator>(
        self,
        store: S,
        auth: A,
    ) -> Result<SequenceServer<S, G, A>, SequenceError> {
        let session_config = self.session_config.validated();
        let transport = WebSocketTransport::bind(&self.bind_addr, session_config.limits()).await?;

        let lobbies = Arc::new(Mutex::new(LobbyManager::new(
            store.clone(),
            self.lobby_config,
        )));
        let state = Arc::new(ServerState {
            store,
            lobbies,
            auth,
            session_config,
        });

        Ok(SequenceServer {
            transport,
            state,
            reap_interval: self.reap_interval,
        })
    }
}

impl Default for SequenceServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Sequence server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct SequenceServer<S: StateStore, G: GameEngine, A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, G, A>>,
    reap_interval: Duration,
}

impl<S, G, A> SequenceServer<S, G, A>
where
    S: StateStore,
    G: GameEngine,
    A: Authenticator,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns a handle for managing lobbies while the server runs.
    pub fn handle(&self) -> ServerHandle<S, G> {
        ServerHandle {
            lobbies: Arc::clone(&self.state.lobbies),
        }
    }

    /// Runs the server accept loop.
    ///
    /// Spawns a task per accepted TCP connection, which performs the
    /// WebSocket upgrade under the read deadline and then runs the session,
    /// plus a task that reaps stopped lobbies. Runs until the process is
    /// terminated.
    pub async fn run(mut self) -> Result<(), SequenceError> {
        tracing::info!("Sequence server running");

        tokio::spawn(reap_loop(self.handle(), self.reap_interval));

        loop {
            match self.transport.accept_pending().await {
                Ok(pending) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let addr = pending.peer_addr();
                        let conn = match pending.handshake().await {
                            Ok(conn) => conn,
                            Err(e) => {
                                tracing::debug!(%addr, error = %e, "handshake failed");
                                return;
                            }
                        };
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    // EMFILE and friends fail immediately; back off.
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

async fn reap_loop<S: StateStore, G: GameEngine>(handle: ServerHandle<S, G>, period: Duration) {
    let period = period.max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        match handle.reap().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(reaped = n, "stopped lobbies removed"),
            Err(e) => tracing::warn!(error = %e, "reaping lobbies failed"),
        }
    }
}

/// Lobby management for the HTTP collaborator (create form, lobby page,
/// admin close). Cheap to clone.
pub struct ServerHandle<S: StateStore, G: GameEngine> {
    lobbies: Arc<Mutex<LobbyManager<S, G>>>,
}

impl<S: StateStore, G: GameEngine> Clone for ServerHandle<S, G> {
    fn clone(&self) -> Self {
        Self {
            lobbies: Arc::clone(&self.lobbies),
        }
    }
}

impl<S: StateStore, G: GameEngine> ServerHandle<S, G> {
    /// Creates a lobby. Without `code` a random free one is chosen.
    pub async fn create_lobby(
        &self,
        settings: Settings,
        code: Option<LobbyCode>,
    ) -> Result<LobbyCode, SequenceError> {
        Ok(self.lobbies.lock().await.create(settings, code).await?)
    }

    /// Returns a summary of a lobby, reviving it from its snapshot if its
    /// task had stopped.
    pub async fn lookup_lobby(&self, code: &LobbyCode) -> Result<LobbyInfo, SequenceError> {
        // Lock only for the lookup; the info round trip runs unlocked.
        let handle = self.lobbies.lock().await.lookup(code).await?;
        Ok(handle.info().await?)
    }

    /// Closes a lobby; its sessions receive `lobby_closed`.
    pub async fn close_lobby(&self, code: &LobbyCode) -> Result<(), SequenceError> {
        Ok(self.lobbies.lock().await.close(code).await?)
    }

    /// Codes of every registered lobby, sorted.
    pub async fn lobby_codes(&self) -> Vec<LobbyCode> {
        self.lobbies.lock().await.codes()
    }

    /// Drops stopped lobbies that left no snapshot behind.
    pub async fn reap(&self) -> Result<usize, SequenceError> {
        Ok(self.lobbies.lock().await.reap().await?)
    }
}
