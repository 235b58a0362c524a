//! The upgrade request a connection was opened with.

use std::collections::HashMap;

/// Path, query parameters and cookies of the HTTP request that was
/// upgraded into a connection.
///
/// The transport captures this during the handshake. Higher layers read
/// the lobby code from the query string and the display name from the
/// cookie the HTTP layer issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    path: String,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl ConnectRequest {
    /// Creates a request for `path` with no query parameters or cookies.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Builds a request from a raw query string (without the leading `?`)
    /// and any number of `Cookie` header values.
    pub fn parse<'a>(
        path: &str,
        query: Option<&str>,
        cookie_headers: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut request = Self::new(path);
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                request.query.insert(decode(key), decode(value));
            }
        }
        for header in cookie_headers {
            for pair in header.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    request
                        .cookies
                        .insert(name.trim().to_string(), decode(value.trim()));
                }
            }
        }
        request
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds a cookie.
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    /// The request path, e.g. `/lobby/ws`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Looks up a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Looks up a cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Percent-decodes a query or cookie component. `+` decodes to a space.
/// Malformed escapes are kept as-is.
fn decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
