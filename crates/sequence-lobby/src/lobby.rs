//! Lobby actor: the single task that owns a lobby's roster, colors and
//! state.
//!
//! Sessions never call the lobby directly. They publish to the lobby's
//! inbound topics in the store, and the actor consumes one subscription
//! over all of them, so a room's events are handled one at a time in
//! publish order. The outside world only gets a [`LobbyHandle`] for
//! inspection and shutdown.

use std::marker::PhantomData;
use std::time::Duration;

use sequence_protocol::{
    Codec, Color, CurrentState, JsonCodec, LobbyChannel, LobbyCode, LobbySnapshot, PlayerSnapshot,
    Presence, ProtocolError, Recipient, Response, ResponseAction, SessionEnvelope, Settings,
    StateChange, Username,
};
use sequence_store::{StateStore, StoreMessage, TopicSubscription};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::logic::{Effect, LobbyEvent, LobbyView, apply};
use crate::{GameEngine, LobbyConfig, LobbyError, LobbyRepo};

/// Commands sent to a lobby actor through its control channel.
#[derive(Debug)]
enum LobbyCommand {
    /// Request a summary of the lobby.
    Info { reply: oneshot::Sender<LobbyInfo> },

    /// Close the lobby. The reply fires once `lobby_closed` is published.
    Shutdown { reply: oneshot::Sender<()> },
}

/// A summary of a running lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyInfo {
    pub code: LobbyCode,
    pub state: CurrentState,
    pub settings: Settings,
    /// The connected roster.
    pub players: Vec<PlayerSnapshot>,
    pub available_colors: Vec<Color>,
    /// Players whose color is held for them until their snapshot expires.
    pub departed: Vec<Username>,
}

/// Handle to a running lobby actor.
///
/// Cheap to clone; it wraps an `mpsc::Sender`. The `LobbyManager` holds
/// one per lobby.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    code: LobbyCode,
    sender: mpsc::Sender<LobbyCommand>,
}

impl LobbyHandle {
    /// Returns the lobby's code.
    pub fn code(&self) -> &LobbyCode {
        &self.code
    }

    /// Whether the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Requests a summary of the lobby.
    pub async fn info(&self) -> Result<LobbyInfo, LobbyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(LobbyCommand::Info { reply: reply_tx })
            .await
            .map_err(|_| LobbyError::Unavailable(self.code.clone()))?;
        reply_rx
            .await
            .map_err(|_| LobbyError::Unavailable(self.code.clone()))
    }

    /// Closes the lobby and waits until its sessions have been told.
    pub async fn shutdown(&self) -> Result<(), LobbyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(LobbyCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| LobbyError::Unavailable(self.code.clone()))?;
        reply_rx
            .await
            .map_err(|_| LobbyError::Unavailable(self.code.clone()))
    }
}

/// Why the actor loop ended.
enum Exit {
    Shutdown(oneshot::Sender<()>),
    Idle,
    Detached,
    Failed(LobbyError),
}

/// The internal lobby actor state. Runs inside a Tokio task.
struct LobbyActor<S: StateStore, G: GameEngine> {
    code: LobbyCode,
    view: LobbyView,
    repo: LobbyRepo<S>,
    subscription: S::Subscription,
    receiver: mpsc::Receiver<LobbyCommand>,
    config: LobbyConfig,
    codec: JsonCodec,
    game: Option<G::Game>,
    empty_since: Option<Instant>,
    _engine: PhantomData<fn() -> G>,
}

impl<S: StateStore, G: GameEngine> LobbyActor<S, G> {
    /// Runs the actor loop until shutdown, idle timeout, or a store failure.
    async fn run(mut self) {
        tracing::info!(lobby = %self.code, state = %self.view.state(), "lobby started");

        let period = self.config.keepalive_interval.max(Duration::from_millis(1));
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                msg = self.subscription.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.handle_message(msg).await {
                            break Exit::Failed(e);
                        }
                    }
                    None => break Exit::Detached,
                },
                cmd = self.receiver.recv() => match cmd {
                    Some(LobbyCommand::Info { reply }) => {
                        let _ = reply.send(self.info());
                    }
                    Some(LobbyCommand::Shutdown { reply }) => break Exit::Shutdown(reply),
                    None => break Exit::Detached,
                },
                _ = keepalive.tick() => match self.keepalive().await {
                    Ok(true) => {}
                    Ok(false) => break Exit::Idle,
                    Err(e) => break Exit::Failed(e),
                },
            }
        };

        match exit {
            Exit::Shutdown(reply) => {
                tracing::info!(lobby = %self.code, "lobby shutting down");
                if let Err(e) = self.close("the lobby was closed").await {
                    tracing::warn!(lobby = %self.code, error = %e, "failed to announce close");
                }
                let _ = reply.send(());
            }
            Exit::Idle => {
                tracing::info!(lobby = %self.code, "lobby idle, retiring");
                if let Err(e) = self.retire().await {
                    tracing::warn!(lobby = %self.code, error = %e, "failed to retire lobby");
                }
            }
            Exit::Detached => {
                tracing::error!(lobby = %self.code, "store subscription ended");
            }
            Exit::Failed(e) => {
                tracing::error!(lobby = %self.code, error = %e, "store failure, stopping lobby");
            }
        }

        tracing::info!(lobby = %self.code, "lobby stopped");
    }

    /// Turns one store message into an event and applies it.
    ///
    /// Malformed messages are logged and skipped; only store failures
    /// propagate.
    async fn handle_message(&mut self, msg: StoreMessage) -> Result<(), LobbyError> {
        let channel = match LobbyChannel::from_topic(&msg.topic) {
            Some((code, channel)) if code == self.code => channel,
            _ => {
                tracing::warn!(lobby = %self.code, topic = %msg.topic, "message on foreign topic");
                return Ok(());
            }
        };

        let event = match self.decode_event(channel, &msg.payload) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(lobby = %self.code, topic = %msg.topic, error = %e, "malformed message, skipping");
                return Ok(());
            }
        };
        let event = match event {
            LobbyEvent::Register { username, .. } => {
                let prior = self.prior_snapshot(&username).await?;
                LobbyEvent::Register { username, prior }
            }
            other => other,
        };

        tracing::debug!(lobby = %self.code, ?event, "applying event");
        self.dispatch(event).await
    }

    /// Decodes a store message into an event. Registrations come back
    /// without their prior snapshot; outbound topics yield `None`.
    fn decode_event(
        &self,
        channel: LobbyChannel,
        payload: &[u8],
    ) -> Result<Option<LobbyEvent>, ProtocolError> {
        let event = match channel {
            LobbyChannel::Register => {
                let presence: Presence = self.codec.decode(payload)?;
                LobbyEvent::Register {
                    username: presence.username,
                    prior: None,
                }
            }
            LobbyChannel::Deregister => {
                let presence: Presence = self.codec.decode(payload)?;
                LobbyEvent::Deregister {
                    username: presence.username,
                }
            }
            LobbyChannel::Payload => {
                let envelope: SessionEnvelope = self.codec.decode(payload)?;
                LobbyEvent::Payload {
                    username: envelope.username,
                    payload: envelope.payload,
                }
            }
            LobbyChannel::Response | LobbyChannel::State => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Reads the stored snapshot of a registering player. A record that no
    /// longer decodes is treated as absent.
    async fn prior_snapshot(&mut self, username: &Username) -> Result<Option<PlayerSnapshot>, LobbyError> {
        match self.repo.load_player(&self.code, username).await {
            Ok(prior) => Ok(prior),
            Err(LobbyError::Protocol(e)) => {
                tracing::warn!(lobby = %self.code, %username, error = %e, "unreadable player snapshot");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&mut self, event: LobbyEvent) -> Result<(), LobbyError> {
        let effects = apply(&mut self.view, event);
        for effect in effects {
            self.perform(effect).await?;
        }
        self.empty_since = match (self.view.is_empty(), self.empty_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(Instant::now()),
            (false, _) => None,
        };
        Ok(())
    }

    async fn perform(&mut self, effect: Effect) -> Result<(), LobbyError> {
        match effect {
            Effect::SavePlayer(player) => self.repo.save_player(&player).await,
            Effect::KeepPlayer(username) => {
                self.repo.keep_player(&self.code, &username).await.map(drop)
            }
            Effect::ExpirePlayer(username) => self
                .repo
                .expire_player(&self.code, &username, self.config.player_grace)
                .await
                .map(drop),
            Effect::SaveLobby => self.repo.save_lobby(self.view.snapshot()).await,
            Effect::Broadcast(response) => {
                if response.action == ResponseAction::Rejected {
                    tracing::info!(lobby = %self.code, recipient = ?response.recipient, reason = %response.message, "registration rejected");
                }
                self.repo.publish_response(&self.code, &response).await.map(drop)
            }
            Effect::PublishState(state) => {
                tracing::info!(lobby = %self.code, %state, "state changed");
                let change = StateChange {
                    lobby_id: self.code.clone(),
                    state,
                };
                self.repo.publish_state(&change).await.map(drop)
            }
            Effect::StartGame => {
                let players = self.view.ready_roster();
                tracing::info!(lobby = %self.code, players = players.len(), "game started");
                self.game = Some(G::start(&self.view.snapshot().settings, &players));
                Ok(())
            }
        }
    }

    /// Runs on every keepalive tick. Returns `Ok(false)` when the lobby has
    /// been empty for the idle timeout.
    async fn keepalive(&mut self) -> Result<bool, LobbyError> {
        self.subscription.ping().await?;

        for username in self.view.departed() {
            if !self.repo.player_exists(&self.code, &username).await? {
                tracing::debug!(lobby = %self.code, %username, "departed player expired");
                self.dispatch(LobbyEvent::Expired { username }).await?;
            }
        }

        if self.view.is_empty() && self.empty_since.is_none() {
            self.empty_since = Some(Instant::now());
        }
        let idle = self
            .empty_since
            .is_some_and(|since| since.elapsed() >= self.config.idle_timeout);
        Ok(!idle)
    }

    /// Tells every session the lobby is gone and drops player records.
    async fn close(&mut self, reason: &str) -> Result<(), LobbyError> {
        let snapshot = self.view.snapshot();
        for username in snapshot.players.keys().chain(snapshot.departed.keys()) {
            self.repo.delete_player(&self.code, username).await?;
        }
        let response =
            Response::new(ResponseAction::LobbyClosed, Recipient::All).with_message(reason);
        self.repo.publish_response(&self.code, &response).await?;
        Ok(())
    }

    /// Closes an idle lobby on its own, including its snapshot.
    async fn retire(&mut self) -> Result<(), LobbyError> {
        self.close("the lobby closed after being empty").await?;
        self.repo.delete_lobby(&self.code).await?;
        Ok(())
    }

    fn info(&self) -> LobbyInfo {
        let snapshot = self.view.snapshot();
        LobbyInfo {
            code: self.code.clone(),
            state: snapshot.state,
            settings: snapshot.settings,
            players: snapshot.players.values().cloned().collect(),
            available_colors: snapshot.available_colors(),
            departed: self.view.departed(),
        }
    }
}

/// Spawns a lobby actor for `snapshot` and returns a handle to it.
///
/// The store subscription is opened before the task starts, so nothing
/// published after this returns can be missed. Players in the snapshot
/// start out departed; see [`LobbyView::restart`].
pub(crate) async fn spawn_lobby<S: StateStore, G: GameEngine>(
    snapshot: LobbySnapshot,
    repo: LobbyRepo<S>,
    config: LobbyConfig,
) -> Result<LobbyHandle, LobbyError> {
    let code = snapshot.code.clone();
    let subscription = repo.subscribe_inbound(&code).await?;
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));

    let (view, effects) = LobbyView::restart(snapshot);
    let empty_since = view.is_empty().then(Instant::now);
    let mut actor = LobbyActor::<S, G> {
        code: code.clone(),
        view,
        repo,
        subscription,
        receiver: rx,
        config,
        codec: JsonCodec,
        game: None,
        empty_since,
        _engine: PhantomData,
    };

    if !effects.is_empty() {
        for effect in effects {
            actor.perform(effect).await?;
        }
        tracing::info!(
            lobby = %code,
            departed = actor.view.departed().len(),
            "stored players held until they register again"
        );
    }

    tokio::spawn(actor.run());

    Ok(LobbyHandle { code, sender: tx })
}
