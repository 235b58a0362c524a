//! # Sequence
//!
//! Real-time lobby server for the Sequence card game.
//!
//! Browsers connect to `/lobby/ws?lobby-id=CODE` with the `username`
//! cookie the HTTP layer issued. Each lobby runs as its own task, the only
//! writer of its roster, colors and state; sessions and lobbies talk only
//! through topics in a shared store. Once every seat has picked a color
//! and is ready, the lobby starts a game through a [`GameEngine`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sequence::prelude::*;
//!
//! # async fn run() -> Result<(), SequenceError> {
//! let server = SequenceServerBuilder::new()
//!     .bind("127.0.0.1:42069")
//!     .build::<OpeningTable, _>(CookieAuthenticator::default())
//!     .await?;
//!
//! // The HTTP layer creates lobbies through the handle.
//! let handle = server.handle();
//! let code = handle.create_lobby(Settings::default(), None).await?;
//! println!("join at /lobby/ws?lobby-id={code}");
//!
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;
mod table;

pub use error::SequenceError;
pub use server::{DEFAULT_BIND, LOBBY_PATH, SequenceServer, SequenceServerBuilder, ServerHandle};
pub use table::{Card, Deck, OpeningTable, Rank, Seat, Suit, Table};

pub use sequence_lobby::{GameEngine, LobbyConfig, LobbyInfo};

/// Commonly used types, re-exported for convenience.
///
/// ```rust
/// use sequence::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        OpeningTable, SequenceError, SequenceServer, SequenceServerBuilder, ServerHandle,
    };
    pub use sequence_lobby::{GameEngine, LobbyConfig, LobbyInfo};
    pub use sequence_protocol::{
        ClientMessage, Color, CurrentState, LobbyCode, Payload, PayloadAction, PlayerSnapshot,
        ResponseAction, Settings, Username,
    };
    pub use sequence_session::{Authenticator, CookieAuthenticator, SessionConfig, SessionError};
    pub use sequence_store::{MemoryStore, MemoryStoreConfig};
    pub use sequence_transport::ConnectRequest;
}
