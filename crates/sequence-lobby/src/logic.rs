//! Lobby transition logic.
//!
//! [`apply`] takes the lobby's current [`LobbyView`] and one
//! [`LobbyEvent`], mutates the view, and returns the [`Effect`]s the
//! actor must carry out, in order. Nothing in here touches the store or
//! the clock, so every rule of the lobby can be tested without a runtime.

use std::collections::HashMap;

use sequence_protocol::{
    Color, CurrentState, LobbySnapshot, Payload, PayloadAction, PlayerSnapshot, Recipient,
    Response, ResponseAction, Username,
};

/// Something that happened to a lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// A session for `username` started. `prior` is the player's stored
    /// snapshot, if one is still alive.
    Register {
        username: Username,
        prior: Option<PlayerSnapshot>,
    },
    /// A session for `username` ended.
    Deregister { username: Username },
    /// A session forwarded a browser payload.
    Payload { username: Username, payload: Payload },
    /// The snapshot of a departed player has expired.
    Expired { username: Username },
}

/// Work the actor performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write the player's snapshot (clears any TTL).
    SavePlayer(PlayerSnapshot),
    /// Clear the TTL of the player's snapshot.
    KeepPlayer(Username),
    /// Give the player's snapshot the grace-window TTL.
    ExpirePlayer(Username),
    /// Write the lobby snapshot.
    SaveLobby,
    /// Publish a response for the lobby's sessions.
    Broadcast(Response),
    /// Publish a state transition.
    PublishState(CurrentState),
    /// Hand the ready roster to the game engine.
    StartGame,
}

/// The lobby state the transition logic works on.
///
/// Wraps the [`LobbySnapshot`] that gets persisted, plus a per-player
/// connection count that only lives in memory. A player with two tabs open
/// has two sessions; they leave the roster when the last one ends.
#[derive(Debug, Clone)]
pub struct LobbyView {
    snapshot: LobbySnapshot,
    connections: HashMap<Username, usize>,
}

impl LobbyView {
    /// Builds a view for a lobby task starting on `snapshot`.
    ///
    /// No session is known to a task that just started, so players listed
    /// in the snapshot move to the departed set: colors stay reserved and
    /// the returned effects put their records on the grace timer. Sessions
    /// still connected are asked to register again; a player who does not
    /// is released by the keepalive sweep once the grace window ends.
    pub fn restart(mut snapshot: LobbySnapshot) -> (Self, Vec<Effect>) {
        let players = std::mem::take(&mut snapshot.players);
        let mut view = Self {
            snapshot,
            connections: HashMap::new(),
        };
        if players.is_empty() {
            return (view, Vec::new());
        }

        let mut effects = Vec::new();
        for (username, player) in players {
            if let Some(color) = player.color {
                view.snapshot.departed.insert(username.clone(), color);
            }
            effects.push(Effect::ExpirePlayer(username));
        }
        effects.push(Effect::SaveLobby);
        effects.push(Effect::Broadcast(
            Response::new(ResponseAction::LobbyRestarted, Recipient::All)
                .with_message("the lobby restarted")
                .with_connected_users(view.snapshot.usernames()),
        ));
        (view, effects)
    }

    pub fn snapshot(&self) -> &LobbySnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> CurrentState {
        self.snapshot.state
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.snapshot.players.is_empty()
    }

    /// Number of live sessions of `username`.
    pub fn connections(&self, username: &Username) -> usize {
        self.connections.get(username).copied().unwrap_or(0)
    }

    /// Players who left while holding a color that is still reserved.
    pub fn departed(&self) -> Vec<Username> {
        self.snapshot.departed.keys().cloned().collect()
    }

    /// Connected players who are ready, in name order.
    pub fn ready_roster(&self) -> Vec<PlayerSnapshot> {
        self.snapshot
            .players
            .values()
            .filter(|p| p.ready)
            .cloned()
            .collect()
    }

    fn ready_count(&self) -> usize {
        self.snapshot.players.values().filter(|p| p.ready).count()
    }

    /// Seats held by everyone except `username`: the connected roster plus
    /// departed players whose color is still reserved.
    fn seats_taken_by_others(&self, username: &Username) -> usize {
        let departed = self
            .snapshot
            .departed
            .keys()
            .filter(|u| *u != username)
            .count();
        self.snapshot.players.len() + departed
    }

    fn release(&mut self, color: Color) {
        self.snapshot.colors.insert(color, true);
    }

    fn reserve(&mut self, color: Color) {
        self.snapshot.colors.insert(color, false);
    }

    /// Reconciles a returning player's stored snapshot with the lobby.
    ///
    /// The player keeps their color if it was reserved for them or is
    /// still free; otherwise they come back without a color and not ready.
    fn restore(&mut self, prior: &PlayerSnapshot) -> PlayerSnapshot {
        let mut player = prior.clone();
        player.lobby_id = self.snapshot.code.clone();
        let reserved = self.snapshot.departed.remove(&player.username);

        if let Some(color) = player.color {
            if reserved == Some(color) || self.snapshot.is_available(color) {
                self.reserve(color);
            } else {
                player.color = None;
            }
        }
        if let Some(old) = reserved {
            if player.color != Some(old) {
                self.release(old);
            }
        }
        if player.color.is_none() {
            player.ready = false;
        }
        player
    }

    fn joined(&self, username: &Username) -> Response {
        let action = match self.snapshot.state {
            CurrentState::InGame => ResponseAction::JoinGame,
            _ => ResponseAction::JoinLobby,
        };
        Response::new(action, Recipient::AllExcept(username.clone()))
            .with_sender(username.clone())
            .with_message(format!("{username} joined"))
            .with_connected_users(self.snapshot.usernames())
    }

    /// The state sync a player gets when they ask for it. The message
    /// lists the colors still free, comma separated.
    fn sync(&self, username: &Username) -> Response {
        let action = match self.snapshot.state {
            CurrentState::InGame => ResponseAction::JoinGame,
            _ => ResponseAction::JoinLobby,
        };
        let free: Vec<&str> = self
            .snapshot
            .available_colors()
            .into_iter()
            .map(Color::as_str)
            .collect();
        let mut response = Response::new(action, Recipient::Only(username.clone()))
            .with_sender(username.clone())
            .with_message(free.join(","))
            .with_connected_users(self.snapshot.usernames());
        if let Some(player) = self.snapshot.players.get(username) {
            response = response.with_player(player.clone());
        }
        response
    }

    /// Moves the lobby into the game when every seat is ready.
    fn check_start(&mut self) -> Vec<Effect> {
        if self.snapshot.state != CurrentState::InLobby
            || self.ready_count() < self.snapshot.settings.num_of_players
        {
            return Vec::new();
        }
        self.snapshot.state = CurrentState::InGame;
        vec![
            Effect::SaveLobby,
            Effect::Broadcast(
                Response::new(ResponseAction::StartGame, Recipient::All)
                    .with_message(CurrentState::InGame.as_str())
                    .with_connected_users(self.snapshot.usernames()),
            ),
            Effect::PublishState(CurrentState::InGame),
            Effect::StartGame,
        ]
    }
}

fn notice(username: &Username, message: impl Into<String>) -> Effect {
    Effect::Broadcast(
        Response::new(ResponseAction::Notice, Recipient::Only(username.clone()))
            .with_message(message),
    )
}

fn rejected(username: &Username, message: impl Into<String>) -> Effect {
    Effect::Broadcast(
        Response::new(ResponseAction::Rejected, Recipient::Only(username.clone()))
            .with_message(message),
    )
}

/// Applies one event to the lobby and returns the effects to carry out.
pub fn apply(view: &mut LobbyView, event: LobbyEvent) -> Vec<Effect> {
    match event {
        LobbyEvent::Register { username, prior } => on_register(view, username, prior),
        LobbyEvent::Deregister { username } => on_deregister(view, username),
        LobbyEvent::Payload { username, payload } => on_payload(view, username, payload),
        LobbyEvent::Expired { username } => on_expired(view, username),
    }
}

fn on_register(
    view: &mut LobbyView,
    username: Username,
    prior: Option<PlayerSnapshot>,
) -> Vec<Effect> {
    if let Some(count) = view.connections.get_mut(&username) {
        *count += 1;
        return vec![Effect::Broadcast(view.joined(&username))];
    }

    let in_game = view.snapshot.state == CurrentState::InGame;
    if in_game && prior.is_none() {
        return vec![rejected(&username, "the game has already started")];
    }
    if !in_game && view.seats_taken_by_others(&username) >= view.snapshot.settings.num_of_players
    {
        return vec![rejected(&username, "the lobby is full")];
    }

    let mut effects = Vec::new();
    let player = match prior {
        Some(prior) => {
            let restored = view.restore(&prior);
            if restored == prior {
                effects.push(Effect::KeepPlayer(username.clone()));
            } else {
                effects.push(Effect::SavePlayer(restored.clone()));
            }
            restored
        }
        None => {
            // A reservation without a live snapshot is stale.
            if let Some(color) = view.snapshot.departed.remove(&username) {
                view.release(color);
            }
            let fresh = PlayerSnapshot::new(view.snapshot.code.clone(), username.clone());
            effects.push(Effect::SavePlayer(fresh.clone()));
            fresh
        }
    };

    view.snapshot.players.insert(username.clone(), player);
    view.connections.insert(username.clone(), 1);
    effects.push(Effect::SaveLobby);
    effects.push(Effect::Broadcast(view.joined(&username)));
    effects.extend(view.check_start());
    effects
}

fn on_deregister(view: &mut LobbyView, username: Username) -> Vec<Effect> {
    let Some(count) = view.connections.get_mut(&username) else {
        return Vec::new();
    };
    *count = count.saturating_sub(1);
    if *count > 0 {
        return Vec::new();
    }
    view.connections.remove(&username);

    if let Some(player) = view.snapshot.players.remove(&username) {
        if let Some(color) = player.color {
            view.snapshot.departed.insert(username.clone(), color);
        }
    }

    vec![
        Effect::ExpirePlayer(username.clone()),
        Effect::SaveLobby,
        Effect::Broadcast(
            Response::new(ResponseAction::Left, Recipient::AllExcept(username.clone()))
                .with_message(format!("{username} left"))
                .with_sender(username)
                .with_connected_users(view.snapshot.usernames()),
        ),
    ]
}

fn on_expired(view: &mut LobbyView, username: Username) -> Vec<Effect> {
    match view.snapshot.departed.remove(&username) {
        Some(color) => {
            view.release(color);
            vec![Effect::SaveLobby]
        }
        None => Vec::new(),
    }
}

fn on_payload(view: &mut LobbyView, username: Username, payload: Payload) -> Vec<Effect> {
    if !view.snapshot.players.contains_key(&username) {
        return Vec::new();
    }
    match payload.action {
        PayloadAction::JoinLobby => vec![Effect::Broadcast(view.sync(&username))],
        PayloadAction::ChatMessage => vec![Effect::Broadcast(
            Response::new(ResponseAction::NewChatMessage, Recipient::All)
                .with_sender(username)
                .with_message(payload.message)
                .with_connected_users(view.snapshot.usernames()),
        )],
        PayloadAction::ChooseColor => on_choose_color(view, username, &payload.message),
        PayloadAction::SetReadyStatus => on_set_ready(view, username),
        // the session closes right after; its deregister does the work
        PayloadAction::LeftLobby => Vec::new(),
    }
}

fn on_choose_color(view: &mut LobbyView, username: Username, message: &str) -> Vec<Effect> {
    if view.snapshot.state != CurrentState::InLobby {
        return vec![notice(&username, "colors are locked once the game starts")];
    }
    let Ok(color) = message.parse::<Color>() else {
        return vec![notice(&username, format!("unknown color {message:?}"))];
    };
    let Some(current) = view.snapshot.players.get(&username).map(|p| p.color) else {
        return Vec::new();
    };
    if current != Some(color) && !view.snapshot.is_available(color) {
        return vec![notice(&username, format!("{color} is already taken"))];
    }

    if let Some(old) = current {
        view.release(old);
    }
    view.reserve(color);
    let Some(player) = view.snapshot.players.get_mut(&username) else {
        return Vec::new();
    };
    player.color = Some(color);
    let player = player.clone();

    vec![
        Effect::SavePlayer(player.clone()),
        Effect::SaveLobby,
        Effect::Broadcast(
            Response::new(ResponseAction::ChooseColor, Recipient::All)
                .with_sender(username)
                .with_message(color.as_str())
                .with_player(player)
                .with_connected_users(view.snapshot.usernames()),
        ),
    ]
}

fn on_set_ready(view: &mut LobbyView, username: Username) -> Vec<Effect> {
    if view.snapshot.state != CurrentState::InLobby {
        return vec![notice(&username, "the game has already started")];
    }
    let Some(player) = view.snapshot.players.get_mut(&username) else {
        return Vec::new();
    };
    if player.color.is_none() {
        return vec![notice(&username, "choose a color before getting ready")];
    }
    player.ready = true;
    let player = player.clone();

    let mut effects = vec![
        Effect::SavePlayer(player.clone()),
        Effect::SaveLobby,
        Effect::Broadcast(
            Response::new(ResponseAction::SetReadyStatus, Recipient::All)
                .with_sender(username)
                .with_message("ready")
                .with_player(player)
                .with_connected_users(view.snapshot.usernames()),
        ),
    ];
    effects.extend(view.check_start());
    effects
}
