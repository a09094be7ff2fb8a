//! Per-server pool of idle, already-authenticated connections
//!
//! Connections are checked out as a `PooledConnection` guard. Calling
//! `release` hands the socket back for reuse; any other way out of scope
//! (error, early return, panic, abandoned call) closes it, so a socket whose
//! stream position is unknown never returns to the pool.

use std::collections::HashMap;
use std::io;

use parking_lot::Mutex;
use tracing::debug;

use super::raw_connection::{ConnectionFactory, RawConnection};
use crate::cluster::error_limiter::server_label;
use crate::cluster::ServerSpec;
use crate::utils::{ConnectionError, ProtocolError, Response};

pub struct ConnectionPool {
    idle: HashMap<String, Mutex<Vec<RawConnection>>>,
    factory: ConnectionFactory,
}

impl ConnectionPool {
    /// Create an empty idle list for every server
    pub fn new<'a>(server_ids: impl IntoIterator<Item = &'a str>, factory: ConnectionFactory) -> Self {
        let idle = server_ids
            .into_iter()
            .map(|id| (id.to_string(), Mutex::new(Vec::new())))
            .collect();
        Self { idle, factory }
    }

    /// Check out a connection, reusing the most recently returned one
    ///
    /// Opens (and authenticates) a new connection when the idle list is
    /// empty. The caller is responsible for recording a failure.
    pub fn acquire(&self, server: &ServerSpec) -> Result<PooledConnection<'_>, ConnectionError> {
        let reused = self
            .idle
            .get(&server.id)
            .and_then(|idle| idle.lock().pop());

        let (conn, reused) = match reused {
            Some(conn) => (conn, true),
            None => {
                debug!("Opening new connection to {}", server);
                (self.factory.create(server)?, false)
            }
        };

        Ok(PooledConnection {
            pool: self,
            server_id: server.id.clone(),
            conn: Some(conn),
            reused,
        })
    }

    /// Return a healthy connection to its server's idle list
    pub fn release(&self, server_id: &str, conn: RawConnection) {
        match self.idle.get(server_id) {
            Some(idle) => idle.lock().push(conn),
            None => debug!(
                "Dropping connection to unknown server {}",
                server_label(server_id)
            ),
        }
    }

    /// Idle connections currently held for a server
    pub fn idle_count(&self, server_id: &str) -> usize {
        self.idle
            .get(server_id)
            .map(|idle| idle.lock().len())
            .unwrap_or(0)
    }
}

/// A checked-out connection; closed on drop unless released
pub struct PooledConnection<'p> {
    pool: &'p ConnectionPool,
    server_id: String,
    conn: Option<RawConnection>,
    reused: bool,
}

impl PooledConnection<'_> {
    /// Send one request frame and read the complete response
    pub fn execute(&mut self, packet: &[u8]) -> Result<Response, ProtocolError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection released").into());
        };
        conn.execute(packet)
    }

    /// Whether this connection came from the idle list
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Hand the connection back for reuse
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(&self.server_id, conn);
        }
    }

    /// Close the connection without returning it
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            debug!(
                "Discarding connection to {}",
                server_label(&self.server_id)
            );
        }
    }
}
