//! Server placement and health
//!
//! This module provides:
//! - Server identifier parsing (`[user:pass@]host[:port]`)
//! - The consistent hash ring mapping keys to candidate servers
//! - Per-server error limiting

pub mod error_limiter;
pub mod ring;
pub mod server;

pub use error_limiter::{ErrorLimitPolicy, ErrorLimiter};
pub use ring::{hashed_key, HashRing, NODE_WEIGHT};
pub use server::{Credentials, ServerSpec, DEFAULT_MEMCACHED_PORT};
