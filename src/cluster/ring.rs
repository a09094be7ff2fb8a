//! Consistent hash ring
//!
//! Each server owns `weight` positions on a 128-bit circle, taken from the
//! MD5 digest of `"{server}-{i}"`. A key is hashed onto the same circle and
//! its candidates are the distinct servers met walking clockwise from there.

use md5::{Digest, Md5};

use super::server::ServerSpec;

/// Virtual nodes per server
pub const NODE_WEIGHT: usize = 50;

/// Immutable ring built once per client
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Servers sorted by identifier, deduplicated
    servers: Vec<ServerSpec>,
    /// (position, server index), sorted by position
    slots: Vec<(u128, usize)>,
    /// Candidates returned per lookup
    tries: usize,
}

impl HashRing {
    /// Build the ring
    ///
    /// `tries` is capped to the number of distinct servers and floored at one.
    pub fn new(servers: Vec<ServerSpec>, weight: usize, tries: usize) -> Self {
        let mut servers = servers;
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers.dedup_by(|a, b| a.id == b.id);

        let mut slots: Vec<(u128, usize)> = Vec::with_capacity(servers.len() * weight);
        for (idx, server) in servers.iter().enumerate() {
            for i in 0..weight {
                slots.push((ring_position(format!("{}-{}", server.id, i).as_bytes()), idx));
            }
        }

        // Stable sort keeps insertion order among equal positions so the
        // later server wins a collision.
        slots.sort_by_key(|&(pos, _)| pos);
        let mut deduped: Vec<(u128, usize)> = Vec::with_capacity(slots.len());
        for slot in slots {
            match deduped.last_mut() {
                Some(last) if last.0 == slot.0 => *last = slot,
                _ => deduped.push(slot),
            }
        }

        let tries = tries.clamp(1, servers.len().max(1));

        Self {
            servers,
            slots: deduped,
            tries,
        }
    }

    /// Ordered candidate servers for a key
    ///
    /// Returns up to `tries` distinct servers, starting at the first slot at
    /// or after the key's position and wrapping around the circle.
    pub fn route(&self, key: &[u8]) -> Vec<&ServerSpec> {
        self.route_indices(key)
            .into_iter()
            .map(|idx| &self.servers[idx])
            .collect()
    }

    pub(crate) fn route_indices(&self, key: &[u8]) -> Vec<usize> {
        let mut served: Vec<usize> = Vec::with_capacity(self.tries);
        if self.slots.is_empty() {
            return served;
        }

        let start = self.slots.partition_point(|&(pos, _)| pos < ring_position(key));

        // One lap at most: stops even when fewer distinct servers exist
        for offset in 0..self.slots.len() {
            let (_, idx) = self.slots[(start + offset) % self.slots.len()];
            if !served.contains(&idx) {
                served.push(idx);
                if served.len() == self.tries {
                    break;
                }
            }
        }
        served
    }

    /// All servers on the ring, sorted by identifier
    pub fn servers(&self) -> &[ServerSpec] {
        &self.servers
    }

    pub fn tries(&self) -> usize {
        self.tries
    }

    /// Number of distinct positions on the circle
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
}

/// Position of arbitrary bytes on the circle
pub fn ring_position(data: &[u8]) -> u128 {
    u128::from_be_bytes(Md5::digest(data).into())
}

/// Hex MD5 of a key, as sent on the wire
pub fn hashed_key(key: &[u8]) -> String {
    hex::encode(Md5::digest(key))
}
