//! Client connection layer

pub mod memcache_ring;
pub mod pool;
pub mod raw_connection;
pub mod sasl;

pub use memcache_ring::{wire_expiry, CachedValue, MemcacheRing};
pub use pool::{ConnectionPool, PooledConnection};
pub use raw_connection::{ConnectionFactory, RawConnection};
pub use sasl::{negotiate, AuthChannel, AuthState, Mechanism, Negotiator, SaslClient};
