//! Error types for memcache-ring

use std::io;
use thiserror::Error;

/// Top-level client error returned by the cache facade
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Unable to get server connection for key {key} after trying {tried} server(s)")]
    AllCandidatesExhausted { key: String, tried: usize },

    #[error("No servers configured")]
    NoServers,

    #[error("Invalid server identifier: {0}")]
    InvalidServer(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures scoped to a single candidate server
///
/// These never reach the caller directly; the client records them against
/// the error limiter and moves on to the next candidate.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Timed out: {0}")]
    Timeout(io::Error),

    #[error("Connection closed unexpectedly")]
    Closed,

    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Whether this failure was a socket timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnectionError::Timeout(_) => true,
            ConnectionError::ConnectFailed { source, .. } => is_timeout_kind(source.kind()),
            ConnectionError::Protocol(ProtocolError::Io(e)) => is_timeout_kind(e.kind()),
            _ => false,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            kind if is_timeout_kind(kind) => ConnectionError::Timeout(e),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => ConnectionError::Closed,
            _ => ConnectionError::Io(e),
        }
    }
}

fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// SASL negotiation errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Auth not enabled on memcached")]
    NotSupported,

    #[error("Suitable mechanism not found in {0:?}")]
    NoSuitableMechanism(Vec<String>),

    #[error("Credentials rejected by server")]
    Rejected,

    #[error("Unexpected {mechanism} challenge: {challenge}")]
    UnexpectedChallenge { mechanism: String, challenge: String },

    #[error("Gave up after {0} challenge rounds")]
    TooManyRounds(usize),

    #[error("Unexpected status 0x{0:02x} during authentication")]
    UnexpectedStatus(u16),

    #[error("Digest computation failed: {0}")]
    Crypto(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Binary protocol framing errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid response magic: expected 0x81, got 0x{0:02x}")]
    InvalidMagic(u8),

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid counter value of {0} bytes")]
    InvalidCounter(usize),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
