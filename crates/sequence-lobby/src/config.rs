//! Lobby configuration.

use std::time::Duration;

/// Timing and sizing knobs shared by every lobby a manager spawns.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long a departed player's snapshot survives. A reconnect within
    /// this window restores the player's color and ready flag.
    pub player_grace: Duration,

    /// Period of the lobby's keepalive tick. Each tick pings the store
    /// subscription, releases colors of expired players, and checks the
    /// idle timeout.
    pub keepalive_interval: Duration,

    /// How long a lobby may have nobody connected before it closes itself.
    pub idle_timeout: Duration,

    /// Capacity of the lobby's control channel.
    pub channel_size: usize,

    /// Random codes tried before giving up on lobby creation.
    pub max_code_attempts: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            player_grace: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
            channel_size: 64,
            max_code_attempts: 64,
        }
    }
}
