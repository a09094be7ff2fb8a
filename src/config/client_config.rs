//! Client configuration resolved from CLI/env and the config file

use std::time::Duration;

use super::cli::CliArgs;
use super::file_config::FileConfig;
use crate::client::raw_connection::{CONN_TIMEOUT, IO_TIMEOUT};
use crate::cluster::{Credentials, ErrorLimitPolicy, DEFAULT_MEMCACHED_PORT, NODE_WEIGHT};
use crate::utils::CacheError;

pub const DEFAULT_TRIES: usize = 3;

/// Everything needed to build a `MemcacheRing`
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub servers: Vec<String>,
    /// Client-wide SASL credentials; inline `user:pass@` entries override
    pub credentials: Option<Credentials>,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// Distinct servers tried per key
    pub tries: usize,
    /// Virtual nodes per server on the ring
    pub node_weight: usize,
    pub error_limit: ErrorLimitPolicy,
}

impl ClientConfig {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            credentials: None,
            connect_timeout: CONN_TIMEOUT,
            io_timeout: IO_TIMEOUT,
            tries: DEFAULT_TRIES,
            node_weight: NODE_WEIGHT,
            error_limit: ErrorLimitPolicy::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_tries(mut self, tries: usize) -> Self {
        self.tries = tries;
        self
    }

    pub fn with_node_weight(mut self, weight: usize) -> Self {
        self.node_weight = weight;
        self
    }

    pub fn with_error_limit(mut self, policy: ErrorLimitPolicy) -> Self {
        self.error_limit = policy;
        self
    }

    /// Merge CLI/env arguments over the optional config file
    ///
    /// Each setting comes from the CLI if given, else the file, else the
    /// default. Username and password fall back independently; credentials
    /// are only configured when both end up present.
    pub fn resolve(args: &CliArgs, file: Option<&FileConfig>) -> Result<Self, CacheError> {
        args.validate().map_err(CacheError::Config)?;
        let section = file.map(|f| f.memcache.clone()).unwrap_or_default();

        let mut servers = args
            .servers
            .as_deref()
            .map(parse_server_list)
            .unwrap_or_default();
        if servers.is_empty() {
            servers = section.servers.map(|s| s.to_vec()).unwrap_or_default();
        }
        if servers.is_empty() {
            servers = vec![format!("127.0.0.1:{}", DEFAULT_MEMCACHED_PORT)];
        }

        let millis = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map(Duration::from_millis).unwrap_or(default)
        };

        let mut config = Self::new(servers)
            .with_connect_timeout(millis(
                args.connect_timeout_ms,
                section.connect_timeout_ms,
                CONN_TIMEOUT,
            ))
            .with_io_timeout(millis(args.io_timeout_ms, section.io_timeout_ms, IO_TIMEOUT))
            .with_tries(args.tries.or(section.tries).unwrap_or(DEFAULT_TRIES));

        let username = args.username.clone().or(section.username);
        let password = args.password.clone().or(section.password);
        if let (Some(username), Some(password)) = (username, password) {
            config = config.with_credentials(Credentials::new(username, password));
        }

        Ok(config)
    }
}

/// Split a comma-separated server list, trimming and dropping empty entries
pub fn parse_server_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
