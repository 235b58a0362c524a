//! Lobby manager: creates, tracks and closes lobbies.

use std::collections::HashMap;
use std::marker::PhantomData;

use rand::Rng;
use sequence_protocol::{LobbyCode, LobbySnapshot, Recipient, Response, ResponseAction, Settings};
use sequence_store::StateStore;

use crate::lobby::spawn_lobby;
use crate::{GameEngine, LobbyConfig, LobbyError, LobbyHandle, LobbyInfo, LobbyRepo};

/// Registry of running lobbies, keyed by code.
///
/// This is the entry point for lobby operations from higher layers (the
/// connection handler and the HTTP collaborator). It is not internally
/// synchronized; the server keeps it behind one `tokio::sync::Mutex`.
pub struct LobbyManager<S: StateStore, G: GameEngine> {
    repo: LobbyRepo<S>,
    config: LobbyConfig,
    lobbies: HashMap<LobbyCode, LobbyHandle>,
    _engine: PhantomData<fn() -> G>,
}

impl<S: StateStore, G: GameEngine> LobbyManager<S, G> {
    /// Creates an empty manager on top of `store`.
    pub fn new(store: S, config: LobbyConfig) -> Self {
        Self {
            repo: LobbyRepo::new(store),
            config,
            lobbies: HashMap::new(),
            _engine: PhantomData,
        }
    }

    /// The snapshot repository lobbies of this manager write through.
    pub fn repo(&self) -> &LobbyRepo<S> {
        &self.repo
    }

    /// Creates a lobby and starts its task.
    ///
    /// With `code == None` a random free code is generated. An explicit
    /// code must not belong to a running or stored lobby; a retired lobby
    /// that was not reaped yet does not count.
    pub async fn create(
        &mut self,
        settings: Settings,
        code: Option<LobbyCode>,
    ) -> Result<LobbyCode, LobbyError> {
        let settings = settings
            .validate()
            .map_err(|e| LobbyError::InvalidSettings(e.to_string()))?;

        let code = match code {
            Some(code) => {
                let running = self.lobbies.get(&code).is_some_and(LobbyHandle::is_running);
                if running || self.repo.load_lobby(&code).await?.is_some() {
                    return Err(LobbyError::AlreadyExists(code));
                }
                // A stopped lobby without a snapshot is gone; its code is free.
                self.lobbies.remove(&code);
                code
            }
            None => self.generate_code()?,
        };

        let snapshot = LobbySnapshot::new(code.clone(), settings);
        self.repo.save_lobby(&snapshot).await?;
        let handle = spawn_lobby::<S, G>(snapshot, self.repo.clone(), self.config.clone()).await?;
        self.lobbies.insert(code.clone(), handle);

        tracing::info!(
            lobby = %code,
            seats = settings.num_of_players,
            "lobby created"
        );
        Ok(code)
    }

    /// Draws random codes until one is not in the registry.
    fn generate_code(&self) -> Result<LobbyCode, LobbyError> {
        let mut rng = rand::rng();
        let attempts = self.config.max_code_attempts.max(1);
        for _ in 0..attempts {
            let raw: String = (0..LobbyCode::LEN)
                .map(|_| {
                    let i = rng.random_range(0..LobbyCode::ALPHABET.len());
                    char::from(LobbyCode::ALPHABET[i])
                })
                .collect();
            let code = LobbyCode::parse(&raw)?;
            if !self.lobbies.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(LobbyError::CodeSpaceExhausted { attempts })
    }

    /// Returns a handle to a running lobby.
    ///
    /// A lobby whose task has stopped is started again from its stored
    /// snapshot. Without a snapshot the code is unknown.
    pub async fn lookup(&mut self, code: &LobbyCode) -> Result<LobbyHandle, LobbyError> {
        if let Some(handle) = self.lobbies.get(code) {
            if handle.is_running() {
                return Ok(handle.clone());
            }
        }

        let Some(snapshot) = self.repo.load_lobby(code).await? else {
            self.lobbies.remove(code);
            return Err(LobbyError::NotFound(code.clone()));
        };
        let handle = spawn_lobby::<S, G>(snapshot, self.repo.clone(), self.config.clone()).await?;
        self.lobbies.insert(code.clone(), handle.clone());
        tracing::info!(lobby = %code, "lobby revived from snapshot");
        Ok(handle)
    }

    /// Closes a lobby: every session in it receives `lobby_closed`, the
    /// snapshot is deleted, and the code is freed.
    pub async fn close(&mut self, code: &LobbyCode) -> Result<(), LobbyError> {
        let handle = self
            .lobbies
            .remove(code)
            .ok_or_else(|| LobbyError::NotFound(code.clone()))?;

        if handle.shutdown().await.is_err() {
            // The task is gone; tell any sessions still listening ourselves.
            let response = Response::new(ResponseAction::LobbyClosed, Recipient::All)
                .with_message("the lobby was closed");
            self.repo.publish_response(code, &response).await?;
        }
        self.repo.delete_lobby(code).await?;

        tracing::info!(lobby = %code, "lobby closed");
        Ok(())
    }

    /// Drops registry entries of stopped lobbies that left no snapshot
    /// behind. Returns how many were removed.
    pub async fn reap(&mut self) -> Result<usize, LobbyError> {
        let stopped: Vec<LobbyCode> = self
            .lobbies
            .iter()
            .filter(|(_, handle)| !handle.is_running())
            .map(|(code, _)| code.clone())
            .collect();

        let mut removed = 0;
        for code in stopped {
            if self.repo.load_lobby(&code).await?.is_none() {
                self.lobbies.remove(&code);
                removed += 1;
                tracing::debug!(lobby = %code, "reaped stopped lobby");
            }
        }
        Ok(removed)
    }

    /// Returns a summary of a running lobby.
    pub async fn info(&self, code: &LobbyCode) -> Result<LobbyInfo, LobbyError> {
        let handle = self
            .lobbies
            .get(code)
            .ok_or_else(|| LobbyError::NotFound(code.clone()))?;
        handle.info().await
    }

    /// Codes of every registered lobby, sorted.
    pub fn codes(&self) -> Vec<LobbyCode> {
        let mut codes: Vec<LobbyCode> = self.lobbies.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Number of registered lobbies.
    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}
