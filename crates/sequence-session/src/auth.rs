//! Identity resolution for connecting browsers.
//!
//! The lobby server does not run accounts. The HTTP layer hands every
//! browser an ephemeral display name in a cookie, and the WebSocket
//! upgrade carries that cookie along. An [`Authenticator`] turns the
//! upgrade request into a [`Username`].
//!
//! # Why a trait?
//!
//! The cookie is how browsers identify themselves today, but tests (and a
//! future login flow) want to plug in something else without touching the
//! session code.

use std::future::Future;

use sequence_protocol::Username;
use sequence_transport::ConnectRequest;

use crate::SessionError;

/// Resolves who is behind an upgrade request.
///
/// # Example
///
/// ```rust
/// use sequence_protocol::Username;
/// use sequence_session::{Authenticator, SessionError};
/// use sequence_transport::ConnectRequest;
///
/// /// Takes the name from a `name` query parameter.
/// struct QueryAuthenticator;
///
/// impl Authenticator for QueryAuthenticator {
///     async fn authenticate(&self, request: &ConnectRequest) -> Result<Username, SessionError> {
///         let name = request
///             .query("name")
///             .ok_or_else(|| SessionError::AuthFailed("no name".into()))?;
///         Username::new(name).map_err(|e| SessionError::AuthFailed(e.to_string()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the display name of the connecting browser, or
    /// [`SessionError::AuthFailed`].
    fn authenticate(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = Result<Username, SessionError>> + Send;
}

/// Reads the display name from a cookie, `username` by default.
#[derive(Debug, Clone)]
pub struct CookieAuthenticator {
    cookie: String,
}

impl CookieAuthenticator {
    /// The cookie the HTTP layer sets.
    pub const DEFAULT_COOKIE: &'static str = "username";

    /// Reads the name from `cookie` instead of the default.
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
        }
    }
}

impl Default for CookieAuthenticator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COOKIE)
    }
}

impl Authenticator for CookieAuthenticator {
    async fn authenticate(&self, request: &ConnectRequest) -> Result<Username, SessionError> {
        let raw = request
            .cookie(&self.cookie)
            .ok_or_else(|| SessionError::AuthFailed(format!("missing {} cookie", self.cookie)))?;
        Username::new(raw).map_err(|e| SessionError::AuthFailed(e.to_string()))
    }
}
