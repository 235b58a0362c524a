//! Snapshot persistence and topic publishing on top of a [`StateStore`].

use std::time::Duration;

use sequence_protocol::{
    Codec, JsonCodec, LobbyChannel, LobbyCode, LobbySnapshot, PlayerSnapshot, Response,
    StateChange, Username, lobby_key, player_key,
};
use sequence_store::StateStore;

use crate::LobbyError;

/// Typed access to the records and topics of lobbies.
#[derive(Debug, Clone)]
pub struct LobbyRepo<S> {
    store: S,
    codec: JsonCodec,
}

impl<S: StateStore> LobbyRepo<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            codec: JsonCodec,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load_lobby(&self, code: &LobbyCode) -> Result<Option<LobbySnapshot>, LobbyError> {
        match self.store.get(&lobby_key(code)).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_lobby(&self, snapshot: &LobbySnapshot) -> Result<(), LobbyError> {
        let bytes = self.codec.encode(snapshot)?;
        self.store.set(&lobby_key(&snapshot.code), bytes).await?;
        Ok(())
    }

    pub async fn delete_lobby(&self, code: &LobbyCode) -> Result<bool, LobbyError> {
        Ok(self.store.delete(&lobby_key(code)).await?)
    }

    pub async fn load_player(
        &self,
        code: &LobbyCode,
        username: &Username,
    ) -> Result<Option<PlayerSnapshot>, LobbyError> {
        match self.store.get(&player_key(code, username)).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a player's snapshot is still alive.
    pub async fn player_exists(
        &self,
        code: &LobbyCode,
        username: &Username,
    ) -> Result<bool, LobbyError> {
        Ok(self.store.get(&player_key(code, username)).await?.is_some())
    }

    pub async fn save_player(&self, player: &PlayerSnapshot) -> Result<(), LobbyError> {
        let bytes = self.codec.encode(player)?;
        self.store
            .set(&player_key(&player.lobby_id, &player.username), bytes)
            .await?;
        Ok(())
    }

    /// Clears the TTL of a player's snapshot.
    pub async fn keep_player(&self, code: &LobbyCode, username: &Username) -> Result<bool, LobbyError> {
        Ok(self.store.persist(&player_key(code, username)).await?)
    }

    /// Lets a player's snapshot expire after `ttl`.
    pub async fn expire_player(
        &self,
        code: &LobbyCode,
        username: &Username,
        ttl: Duration,
    ) -> Result<bool, LobbyError> {
        Ok(self.store.expire(&player_key(code, username), ttl).await?)
    }

    pub async fn delete_player(&self, code: &LobbyCode, username: &Username) -> Result<bool, LobbyError> {
        Ok(self.store.delete(&player_key(code, username)).await?)
    }

    /// Publishes a response to every session of the lobby.
    pub async fn publish_response(
        &self,
        code: &LobbyCode,
        response: &Response,
    ) -> Result<usize, LobbyError> {
        let bytes = self.codec.encode(response)?;
        Ok(self
            .store
            .publish(&LobbyChannel::Response.topic(code), bytes)
            .await?)
    }

    pub async fn publish_state(&self, change: &StateChange) -> Result<usize, LobbyError> {
        let bytes = self.codec.encode(change)?;
        Ok(self
            .store
            .publish(&LobbyChannel::State.topic(&change.lobby_id), bytes)
            .await?)
    }

    /// Subscribes to the topics a lobby consumes.
    pub async fn subscribe_inbound(&self, code: &LobbyCode) -> Result<S::Subscription, LobbyError> {
        let topics = LobbyChannel::topics(&LobbyChannel::INBOUND, code);
        Ok(self.store.subscribe(&topics).await?)
    }
}
