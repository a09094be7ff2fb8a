//! Optional TOML configuration file
//!
//! ```toml
//! [memcache]
//! servers = ["10.0.0.1:11211", "10.0.0.2:11211"]  # or "a:11211, b:11211"
//! username = "cache"
//! password = "secret"
//! connect_timeout_ms = 300
//! io_timeout_ms = 2000
//! tries = 3
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::utils::CacheError;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub memcache: MemcacheSection,
}

/// The `[memcache]` table
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemcacheSection {
    pub servers: Option<ServerList>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub io_timeout_ms: Option<u64>,
    pub tries: Option<usize>,
}

/// Server list written either as an array or a comma-separated string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerList {
    List(Vec<String>),
    Joined(String),
}

impl ServerList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ServerList::List(servers) => servers
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            ServerList::Joined(joined) => super::parse_server_list(joined),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| CacheError::Config(format!("Invalid {}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
