//! Per-server error limiting
//!
//! If more than `count` errors occur within `window`, the server is skipped
//! for `duration`. Each server's state sits behind its own lock so failures
//! on one node never serialize callers talking to another.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

pub const ERROR_LIMIT_COUNT: usize = 10;
pub const ERROR_LIMIT_TIME: Duration = Duration::from_secs(60);
pub const ERROR_LIMIT_DURATION: Duration = Duration::from_secs(60);

/// Thresholds for excluding a failing server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLimitPolicy {
    /// Errors tolerated inside the window
    pub count: usize,
    /// Look-back window for counting errors
    pub window: Duration,
    /// How long an error-limited server is skipped
    pub duration: Duration,
}

impl Default for ErrorLimitPolicy {
    fn default() -> Self {
        Self {
            count: ERROR_LIMIT_COUNT,
            window: ERROR_LIMIT_TIME,
            duration: ERROR_LIMIT_DURATION,
        }
    }
}

#[derive(Debug, Default)]
struct ServerErrors {
    timestamps: Vec<Instant>,
    limited_until: Option<Instant>,
}

/// Error record for every server on the ring
pub struct ErrorLimiter {
    policy: ErrorLimitPolicy,
    servers: HashMap<String, Mutex<ServerErrors>>,
}

impl ErrorLimiter {
    pub fn new<'a>(server_ids: impl IntoIterator<Item = &'a str>, policy: ErrorLimitPolicy) -> Self {
        let servers = server_ids
            .into_iter()
            .map(|id| (id.to_string(), Mutex::new(ServerErrors::default())))
            .collect();
        Self { policy, servers }
    }

    /// Record a transport failure now
    pub fn record_failure(&self, server: &str) -> bool {
        self.record_failure_at(server, Instant::now())
    }

    /// Record a transport failure at `now`
    ///
    /// Returns true if this failure pushed the server into the limited state.
    pub fn record_failure_at(&self, server: &str, now: Instant) -> bool {
        let Some(state) = self.servers.get(server) else {
            debug!("Ignoring failure for unknown server {}", server);
            return false;
        };

        let mut state = state.lock();
        state.timestamps.push(now);
        if state.timestamps.len() <= self.policy.count {
            return false;
        }

        let window = self.policy.window;
        state
            .timestamps
            .retain(|&t| now.saturating_duration_since(t) < window);

        if state.timestamps.len() > self.policy.count {
            state.limited_until = Some(now + self.policy.duration);
            error!(
                "Error limiting server {} for {:?}",
                server_label(server),
                self.policy.duration
            );
            return true;
        }
        false
    }

    /// Whether the server may be tried now
    pub fn is_eligible(&self, server: &str) -> bool {
        self.is_eligible_at(server, Instant::now())
    }

    /// Pure deadline comparison; never prunes
    pub fn is_eligible_at(&self, server: &str, now: Instant) -> bool {
        match self.servers.get(server) {
            Some(state) => state.lock().limited_until.map_or(true, |until| now >= until),
            None => true,
        }
    }

    /// Errors currently on record for a server
    pub fn failure_count(&self, server: &str) -> usize {
        self.servers
            .get(server)
            .map(|state| state.lock().timestamps.len())
            .unwrap_or(0)
    }
}

/// Strip inline credentials before a server id reaches the logs
pub(crate) fn server_label(server: &str) -> &str {
    server.rsplit_once('@').map_or(server, |(_, address)| address)
}
