//! memcache-ring library
//!
//! Blocking memcached binary-protocol client that spreads keys over a
//! consistent-hash ring, retries on the next server when one fails, and
//! error-limits servers that keep failing. Connections are pooled per
//! server and authenticated with SASL when credentials are configured.

pub mod client;
pub mod cluster;
pub mod config;
pub mod utils;

#[cfg(test)]
mod testing;

pub use client::{CachedValue, MemcacheRing};
pub use cluster::{Credentials, ServerSpec};
pub use config::ClientConfig;
pub use utils::{CacheError, Result};
