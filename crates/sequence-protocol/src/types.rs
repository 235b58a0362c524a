//! Core protocol types for the Sequence lobby.
//!
//! Three families of types live here:
//!
//! - **Identity**: [`LobbyCode`], [`Username`], [`Color`].
//! - **Records** kept in the shared store: [`Settings`], [`PlayerSnapshot`],
//!   [`LobbySnapshot`], [`CurrentState`].
//! - **Messages**: what the browser sends ([`Payload`]), what the lobby
//!   publishes ([`Response`]), what the browser finally receives
//!   ([`ClientMessage`]), and the small envelopes that travel between
//!   sessions and the lobby over store topics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The short code that identifies a lobby, e.g. `K7QZ`.
///
/// Codes are exactly [`LobbyCode::LEN`] characters drawn from
/// [`LobbyCode::ALPHABET`]. Parsing upper-cases the input, so a player
/// typing `k7qz` reaches the same lobby.
///
/// `#[serde(try_from = "String", into = "String")]` makes the JSON form a
/// plain string and runs [`LobbyCode::parse`] on every decode, so an
/// invalid code can never be deserialized into this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LobbyCode(String);

impl LobbyCode {
    /// Number of characters in a code.
    pub const LEN: usize = 4;

    /// Characters a code is made of.
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Validates and normalizes a code.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidMessage` if the trimmed input is not
    /// exactly four characters from the alphabet.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() != Self::LEN || !code.bytes().all(|b| Self::ALPHABET.contains(&b)) {
            return Err(ProtocolError::InvalidMessage(format!(
                "invalid lobby code {raw:?}"
            )));
        }
        Ok(Self(code))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LobbyCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LobbyCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LobbyCode> for String {
    fn from(code: LobbyCode) -> Self {
        code.0
    }
}

/// A player's display name, unique within one lobby.
///
/// Names come from a cookie the HTTP layer sets, so they are treated as
/// untrusted input: surrounding whitespace is trimmed, and empty names,
/// names longer than [`Username::MAX_LEN`] characters, and names with
/// control characters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Longest accepted name, in characters.
    pub const MAX_LEN: usize = 32;

    /// Validates a display name.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidMessage` for empty, overlong, or
    /// control-character names.
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        let name = raw.trim();
        if name.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty username".into()));
        }
        if name.chars().count() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidMessage(format!(
                "username longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidMessage(
                "username contains control characters".into(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(name: Username) -> Self {
        name.0
    }
}

/// A seat color. A color held by one player is unavailable to the others.
///
/// `#[serde(rename_all = "lowercase")]` gives the JSON form the browser
/// sends in a `choose_color` message: `"red"`, `"blue"`, `"green"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Blue,
    Green,
}

impl Color {
    /// Every color a lobby can hand out. Its length caps the seat count.
    pub const PALETTE: [Color; 3] = [Color::Red, Color::Blue, Color::Green];

    /// Returns the lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Color::PALETTE
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ProtocolError::InvalidMessage(format!("unknown color {s:?}")))
    }
}

/// Serde adapter for an optional color stored as a string, where `""`
/// means "no color chosen yet".
mod color_field {
    use super::Color;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(color: &Option<Color>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(color.map_or("", Color::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Color>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Store records
// ---------------------------------------------------------------------------

/// Options chosen when a lobby is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Seats in the lobby. The game starts when this many players are ready.
    pub num_of_players: usize,
    /// Cards dealt to each player.
    pub max_hand_size: usize,
}

impl Settings {
    /// Smallest seat count that makes a game.
    pub const MIN_PLAYERS: usize = 2;

    /// Checks the seat count against the palette and the hand size
    /// against zero.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidMessage` describing the bad field.
    pub fn validate(self) -> Result<Self, ProtocolError> {
        let max_players = Color::PALETTE.len();
        if !(Self::MIN_PLAYERS..=max_players).contains(&self.num_of_players) {
            return Err(ProtocolError::InvalidMessage(format!(
                "num_of_players must be between {} and {max_players}, got {}",
                Self::MIN_PLAYERS,
                self.num_of_players
            )));
        }
        if self.max_hand_size == 0 {
            return Err(ProtocolError::InvalidMessage(
                "max_hand_size must be positive".into(),
            ));
        }
        Ok(self)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_of_players: 2,
            max_hand_size: 7,
        }
    }
}

/// Where a lobby is in its life.
///
/// `Unknown` is only the zero value of a record that was never
/// initialized. A lobby is created `InLobby` and moves to `InGame` once,
/// when every seat is ready. It never moves back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentState {
    #[default]
    Unknown,
    InLobby,
    InGame,
}

impl CurrentState {
    /// The name browsers receive in a `change_state` message.
    pub const fn as_str(self) -> &'static str {
        match self {
            CurrentState::Unknown => "unknown",
            CurrentState::InLobby => "lobby",
            CurrentState::InGame => "game",
        }
    }
}

impl fmt::Display for CurrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable record of one player in one lobby.
///
/// It outlives the player's connection: when the last connection drops,
/// the record gets a short time-to-live instead of being deleted, and a
/// reconnect within that window gets the color and ready flag back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub lobby_id: LobbyCode,
    pub username: Username,
    /// `""` on the wire when no color has been chosen.
    #[serde(with = "color_field")]
    pub color: Option<Color>,
    pub ready: bool,
}

impl PlayerSnapshot {
    /// A fresh record: no color, not ready.
    pub fn new(lobby_id: LobbyCode, username: Username) -> Self {
        Self {
            lobby_id,
            username,
            color: None,
            ready: false,
        }
    }
}

/// The durable record of a whole lobby.
///
/// `colors` maps every palette color to whether it can still be picked.
/// `players` holds the connected roster. A player who just left keeps
/// their color reserved in `departed` until their [`PlayerSnapshot`]
/// expires, so every unavailable color is held by exactly one entry of
/// `players` or `departed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub code: LobbyCode,
    pub settings: Settings,
    pub colors: BTreeMap<Color, bool>,
    pub players: BTreeMap<Username, PlayerSnapshot>,
    #[serde(default)]
    pub departed: BTreeMap<Username, Color>,
    pub state: CurrentState,
}

impl LobbySnapshot {
    /// A brand new lobby: every color available, nobody seated, `InLobby`.
    pub fn new(code: LobbyCode, settings: Settings) -> Self {
        Self {
            code,
            settings,
            colors: Color::PALETTE.into_iter().map(|c| (c, true)).collect(),
            players: BTreeMap::new(),
            departed: BTreeMap::new(),
            state: CurrentState::InLobby,
        }
    }

    /// Whether `color` can be picked right now.
    pub fn is_available(&self, color: Color) -> bool {
        self.colors.get(&color).copied().unwrap_or(false)
    }

    /// Colors nobody holds or reserves, in palette order.
    pub fn available_colors(&self) -> Vec<Color> {
        self.colors
            .iter()
            .filter(|(_, available)| **available)
            .map(|(color, _)| *color)
            .collect()
    }

    /// Names of the connected roster, sorted.
    pub fn usernames(&self) -> Vec<Username> {
        self.players.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Browser → server
// ---------------------------------------------------------------------------

/// The actions a browser may send.
///
/// This is a closed set: any other `action` string fails to decode, and a
/// decode failure ends the sender's read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadAction {
    /// Ask for a fresh copy of the lobby state.
    JoinLobby,
    /// Say something to the room. Older clients send `new_chat_message`.
    #[serde(alias = "new_chat_message")]
    ChatMessage,
    /// Pick a color; `message` is the color name.
    ChooseColor,
    /// Mark yourself ready.
    SetReadyStatus,
    /// Leave the lobby; the connection closes right after.
    LeftLobby,
}

/// One inbound message from a browser: `{"action": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub action: PayloadAction,
    #[serde(default)]
    pub message: String,
}

impl Payload {
    pub fn new(action: PayloadAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server → browser
// ---------------------------------------------------------------------------

/// The actions the server sends to browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    /// Someone joined (or a state sync for the requesting player).
    JoinLobby,
    /// Someone rejoined a lobby that is already in game.
    JoinGame,
    /// Someone's last connection went away.
    Left,
    NewChatMessage,
    /// Someone picked a color; `player` carries their snapshot.
    ChooseColor,
    /// Someone is ready; `player` carries their snapshot.
    SetReadyStatus,
    /// Every seat is ready and the game has started.
    StartGame,
    /// A request was refused; only the requester receives it.
    Notice,
    /// The connection is not admitted to the lobby and will be closed.
    Rejected,
    /// The lobby shut down; every session in it ends.
    LobbyClosed,
    /// The lobby's task was restarted from its snapshot and holds everyone
    /// as departed. Sessions still connected register again; browsers never
    /// see it.
    LobbyRestarted,
    /// The lobby moved between `lobby` and `game`.
    ChangeState,
}

/// Who in a lobby should receive a [`Response`].
///
/// Rust enums can carry data in each variant, which lets one type cover
/// "everyone", "everyone but the sender" and "just this player".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every session in the lobby.
    All,
    /// Every session except those of this player.
    AllExcept(Username),
    /// Only the sessions of this player.
    Only(Username),
}

impl Recipient {
    /// Whether a session belonging to `username` should deliver the message.
    pub fn delivers_to(&self, username: &Username) -> bool {
        match self {
            Recipient::All => true,
            Recipient::AllExcept(skip) => skip != username,
            Recipient::Only(target) => target == username,
        }
    }
}

/// A message the lobby publishes on its response topic.
///
/// Every session in the lobby receives every `Response` from the store
/// and uses [`Recipient::delivers_to`] to decide whether to forward it.
/// The browser never sees the recipient; it gets the [`ClientMessage`]
/// produced by [`Response::to_client`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub action: ResponseAction,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender: Option<Username>,
    pub recipient: Recipient,
    #[serde(default)]
    pub connected_users: Vec<Username>,
    #[serde(default)]
    pub player: Option<PlayerSnapshot>,
}

impl Response {
    /// Starts a response with an empty message and no sender.
    pub fn new(action: ResponseAction, recipient: Recipient) -> Self {
        Self {
            action,
            message: String::new(),
            sender: None,
            recipient,
            connected_users: Vec::new(),
            player: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_sender(mut self, sender: Username) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_connected_users(mut self, users: Vec<Username>) -> Self {
        self.connected_users = users;
        self
    }

    pub fn with_player(mut self, player: PlayerSnapshot) -> Self {
        self.player = Some(player);
        self
    }

    /// The frame a browser receives for this response.
    pub fn to_client(&self) -> ClientMessage {
        ClientMessage {
            action: self.action,
            message: self.message.clone(),
            sender: self.sender.clone(),
            connected_users: self.connected_users.clone(),
            player: self.player.clone(),
        }
    }
}

/// One outbound frame:
/// `{"action", "message", "sender", "connected_users", "player"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ResponseAction,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender: Option<Username>,
    #[serde(default)]
    pub connected_users: Vec<Username>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerSnapshot>,
}

impl ClientMessage {
    /// A `change_state` frame telling the browser to switch views.
    pub fn state_change(state: CurrentState) -> Self {
        Self {
            action: ResponseAction::ChangeState,
            message: state.as_str().to_string(),
            sender: None,
            connected_users: Vec::new(),
            player: None,
        }
    }

    /// A `rejected` frame sent before closing a connection that was
    /// never admitted to a lobby.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            action: ResponseAction::Rejected,
            message: reason.into(),
            sender: None,
            connected_users: Vec::new(),
            player: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session ↔ lobby envelopes
// ---------------------------------------------------------------------------

/// Published on the register and deregister topics when a session
/// starts or ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub username: Username,
}

/// A browser payload tagged with the identity of the session that read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub username: Username,
    pub payload: Payload,
}

/// Published on the state topic when a lobby changes [`CurrentState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub lobby_id: LobbyCode,
    pub state: CurrentState,
}

// =========================================================================
// Tests
// =========================================================================
