//! Player sessions for the Sequence lobby server.
//!
//! This crate handles the lifecycle of one browser connection:
//!
//! 1. **Identity**: who is connecting ([`Authenticator`], by default the
//!    `username` cookie) and to which lobby ([`Session::identify`])
//! 2. **Running**: the read loop and the response loop ([`run_session`])
//! 3. **Leaving**: a deregister event when either loop ends, so the lobby
//!    can start the player's grace window
//!
//! # How it fits in the stack
//!
//! ```text
//! Lobby Layer (beside)  ← consumes what sessions publish, never calls them
//!     ↕ store topics
//! Session Layer (this crate)  ← one per connection
//!     ↕
//! Transport Layer (below)  ← the socket, its deadlines and pings
//! ```

mod auth;
mod error;
mod runner;
mod session;

pub use auth::{Authenticator, CookieAuthenticator};
pub use error::SessionError;
pub use runner::{SessionEnd, run_session};
pub use session::{LocalState, Session, SessionConfig};
