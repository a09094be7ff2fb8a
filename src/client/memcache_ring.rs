//! Cache facade: get/set/delete/incr/decr across the ring
//!
//! Each operation walks the key's candidate servers in ring order. A
//! transport failure on one candidate is logged, counted against that
//! server, and the next candidate is tried. A miss or other application-level
//! status is an answer and ends the walk.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::pool::ConnectionPool;
use super::raw_connection::ConnectionFactory;
use crate::cluster::{hashed_key, Credentials, ErrorLimiter, HashRing, ServerSpec};
use crate::config::ClientConfig;
use crate::utils::{
    counter_extras, encode_request, set_extras, AuthError, CacheError, ConnectionError, Opcode,
    ProtocolError, Response, Result, JSON_FLAG,
};

/// TTLs above this many seconds are absolute unix times
pub const RELATIVE_EXPIRY_LIMIT: u64 = 30 * 24 * 60 * 60;

/// A value read back from the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// Stored without the JSON flag
    Raw(Vec<u8>),
    /// Stored with the JSON flag and decoded
    Json(serde_json::Value),
}

/// Expiration field for a caller TTL
///
/// Up to 30 days the TTL is relative and sent as is. Beyond that it is
/// already an absolute epoch second and is sent unchanged as well, clamped
/// to the 32-bit field. The check is on the TTL value, never on the clock.
pub fn wire_expiry(ttl: u64) -> u32 {
    if ttl > RELATIVE_EXPIRY_LIMIT {
        u32::try_from(ttl).unwrap_or(u32::MAX)
    } else {
        ttl as u32
    }
}

/// Client for a set of memcached servers
pub struct MemcacheRing {
    ring: HashRing,
    pool: ConnectionPool,
    limiter: ErrorLimiter,
}

impl MemcacheRing {
    /// Client with default timeouts, tries and error limits
    pub fn new<S: AsRef<str>>(
        servers: impl IntoIterator<Item = S>,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let servers = servers
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let mut config = ClientConfig::new(servers);
        config.credentials = credentials;
        Self::from_config(&config)
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let servers = config
            .servers
            .iter()
            .map(|id| ServerSpec::parse(id))
            .collect::<Result<Vec<_>>>()?;
        if servers.is_empty() {
            return Err(CacheError::NoServers);
        }

        let ring = HashRing::new(servers, config.node_weight, config.tries);
        let ids = || ring.servers().iter().map(|s| s.id.as_str());
        let limiter = ErrorLimiter::new(ids(), config.error_limit);
        let pool = ConnectionPool::new(
            ids(),
            ConnectionFactory {
                connect_timeout: config.connect_timeout,
                io_timeout: config.io_timeout,
                credentials: config.credentials.clone(),
            },
        );

        Ok(Self {
            ring,
            pool,
            limiter,
        })
    }

    /// Candidate servers for a key, in the order they are tried
    pub fn route(&self, key: &str) -> Vec<&ServerSpec> {
        self.ring.route(key.as_bytes())
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn error_limiter(&self) -> &ErrorLimiter {
        &self.limiter
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Fetch a value; `None` on a miss
    pub fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let packet = encode_request(Opcode::Get, hashed_key(key.as_bytes()).as_bytes(), b"", b"");
        let found = self.run(key, &packet, |response| {
            Ok(response
                .status
                .is_success()
                .then(|| (response.flags().unwrap_or(0), response.value.clone())))
        })?;

        match found {
            Some((flags, value)) if flags & JSON_FLAG != 0 => {
                Ok(Some(CachedValue::Json(serde_json::from_slice(&value)?)))
            }
            Some((_, value)) => Ok(Some(CachedValue::Raw(value))),
            None => Ok(None),
        }
    }

    /// Fetch a JSON value and deserialize it into `T`
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(CachedValue::Json(value)) => Ok(Some(serde_json::from_value(value)?)),
            Some(CachedValue::Raw(bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a value serialized as JSON
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: u64) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.store(key, &body, JSON_FLAG, ttl)
    }

    /// Store bytes verbatim
    pub fn set_raw(&self, key: &str, value: &[u8], ttl: u64) -> Result<()> {
        self.store(key, value, 0, ttl)
    }

    fn store(&self, key: &str, value: &[u8], flags: u32, ttl: u64) -> Result<()> {
        let extras = set_extras(flags, wire_expiry(ttl));
        let packet = encode_request(
            Opcode::Set,
            hashed_key(key.as_bytes()).as_bytes(),
            value,
            &extras,
        );
        self.run(key, &packet, |response| {
            if !response.status.is_success() {
                warn!("Set of {} answered with {:?}", key, response.status);
            }
            Ok(())
        })
    }

    /// Remove a key; absent keys are not an error
    pub fn delete(&self, key: &str) -> Result<()> {
        let packet = encode_request(
            Opcode::Delete,
            hashed_key(key.as_bytes()).as_bytes(),
            b"",
            b"",
        );
        self.run(key, &packet, |_| Ok(()))
    }

    /// Add `delta` to a counter, creating it at `delta` if absent
    ///
    /// A negative delta decrements by its magnitude. Returns `None` when the
    /// server refuses, e.g. for a non-numeric value.
    pub fn incr(&self, key: &str, delta: i64, ttl: u64) -> Result<Option<u64>> {
        if delta < 0 {
            self.decr(key, delta.unsigned_abs(), ttl)
        } else {
            let delta = delta as u64;
            self.counter(key, Opcode::Increment, counter_extras(delta, delta, wire_expiry(ttl)))
        }
    }

    /// Subtract `delta` from a counter, creating it at zero if absent
    pub fn decr(&self, key: &str, delta: u64, ttl: u64) -> Result<Option<u64>> {
        self.counter(key, Opcode::Decrement, counter_extras(delta, 0, wire_expiry(ttl)))
    }

    fn counter(&self, key: &str, opcode: Opcode, extras: [u8; 20]) -> Result<Option<u64>> {
        let packet = encode_request(opcode, hashed_key(key.as_bytes()).as_bytes(), b"", &extras);
        self.run(key, &packet, |response| {
            if response.status.is_success() {
                response.counter_value().map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// Send `packet` to the first candidate that answers
    ///
    /// `interpret` runs on a complete response frame; if it fails the frame
    /// is treated as a protocol error for that candidate.
    fn run<T, F>(&self, key: &str, packet: &[u8], interpret: F) -> Result<T>
    where
        F: Fn(&Response) -> std::result::Result<T, ProtocolError>,
    {
        let mut tried = 0;
        for server in self.ring.route(key.as_bytes()) {
            if !self.limiter.is_eligible(&server.id) {
                debug!("Skipping error-limited server {}", server);
                continue;
            }
            tried += 1;

            let mut conn = match self.pool.acquire(server) {
                Ok(conn) => conn,
                Err(e) => {
                    self.exception_occurred(server, &e, "connecting");
                    continue;
                }
            };

            let outcome = conn
                .execute(packet)
                .and_then(|response| response.check_authorized())
                .and_then(|response| interpret(&response));

            match outcome {
                Ok(value) => {
                    conn.release();
                    return Ok(value);
                }
                Err(e) => {
                    conn.discard();
                    let e = match e {
                        ProtocolError::Unauthorized => ConnectionError::Auth(AuthError::Rejected),
                        other => ConnectionError::from(other),
                    };
                    self.exception_occurred(server, &e, "talking");
                }
            }
        }

        Err(CacheError::AllCandidatesExhausted {
            key: key.to_string(),
            tried,
        })
    }

    fn exception_occurred(&self, server: &ServerSpec, e: &ConnectionError, action: &str) {
        if e.is_timeout() {
            warn!("Timeout {} to memcached: {}", action, server);
        } else {
            warn!("Error {} to memcached: {}: {}", action, server, e);
        }
        self.limiter.record_failure(&server.id);
    }
}
