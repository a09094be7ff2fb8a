//! Server identifier parsing
//!
//! A server is named by `[user:pass@]host[:port]`. The identifier string is
//! kept verbatim and used as the ring and map key; the parsed parts are only
//! needed to open and authenticate a connection.

use std::fmt;

use crate::utils::CacheError;

pub const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// SASL username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both halves must be non-empty for a handshake to be attempted
    pub fn is_usable(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One parsed cache node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    /// Identifier exactly as configured
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Inline credentials, overriding any client-wide pair
    pub credentials: Option<Credentials>,
}

impl ServerSpec {
    /// Parse `[user:pass@]host[:port]`
    pub fn parse(id: &str) -> Result<Self, CacheError> {
        let invalid = || CacheError::InvalidServer(id.to_string());

        let (credentials, address) = match id.split_once('@') {
            Some((creds, address)) => {
                let (user, pass) = creds.split_once(':').ok_or_else(invalid)?;
                (Some(Credentials::new(user, pass)), address)
            }
            None => (None, id),
        };

        let (host, port) = parse_host_port(address).ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            id: id.to_string(),
            host,
            port,
            credentials,
        })
    }

    /// Get node address as string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Credentials for this server: inline ones win over the client-wide pair
    pub fn effective_credentials<'a>(
        &'a self,
        global: Option<&'a Credentials>,
    ) -> Option<&'a Credentials> {
        self.credentials.as_ref().or(global)
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print inline passwords
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals
fn parse_host_port(address: &str) -> Option<(String, u16)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => DEFAULT_MEMCACHED_PORT,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match address.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((address.to_string(), DEFAULT_MEMCACHED_PORT)),
    }
}
