//! Command-line argument parsing
//!
//! Connection options are global; the operation is a subcommand. Server
//! list and credentials can also come from the environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Memcached client over a consistent-hash ring
#[derive(Parser, Debug, Clone)]
#[command(name = "memcache-ring")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Connection Options =====
    /// Comma-separated servers, each `host[:port]` or `user:pass@host[:port]`
    #[arg(short = 's', long = "servers", env = "MEMCACHE_SERVERS")]
    pub servers: Option<String>,

    /// SASL username
    #[arg(short = 'u', long = "username", env = "MEMCACHE_USERNAME")]
    pub username: Option<String>,

    /// SASL password
    #[arg(
        short = 'p',
        long = "password",
        env = "MEMCACHE_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// TOML config file with a [memcache] table
    #[arg(short = 'c', long = "config", env = "MEMCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Connect timeout in milliseconds
    #[arg(long = "connect-timeout-ms")]
    pub connect_timeout_ms: Option<u64>,

    /// Socket read/write timeout in milliseconds
    #[arg(long = "io-timeout-ms")]
    pub io_timeout_ms: Option<u64>,

    /// Servers to try per key
    #[arg(long = "tries")]
    pub tries: Option<usize>,

    // ===== Output Options =====
    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch a key
    Get { key: String },

    /// Store a value (JSON if it parses as JSON, else a JSON string)
    Set {
        key: String,
        value: String,
        /// Seconds; above 30 days an absolute unix time
        #[arg(long, default_value_t = 0)]
        ttl: u64,
        /// Store the bytes verbatim instead of as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Remove a key
    Delete { key: String },

    /// Add to a counter (negative decrements)
    Incr {
        key: String,
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        delta: i64,
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },

    /// Subtract from a counter
    Decr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },

    /// Show the servers a key would be tried on, in order
    Route { key: String },
}

impl CliArgs {
    /// Parse from the process arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_ms == Some(0) {
            return Err("--connect-timeout-ms must be positive".to_string());
        }
        if self.io_timeout_ms == Some(0) {
            return Err("--io-timeout-ms must be positive".to_string());
        }
        if self.tries == Some(0) {
            return Err("--tries must be at least 1".to_string());
        }
        if self.servers.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err("--servers must name at least one server".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_subcommand() {
        let args = CliArgs::parse_from(["test", "-s", "a:1,b:2", "get", "user:42"]);
        assert_eq!(args.servers.as_deref(), Some("a:1,b:2"));
        assert_eq!(
            args.command,
            Command::Get {
                key: "user:42".to_string()
            }
        );
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_set_defaults() {
        let args = CliArgs::parse_from(["test", "set", "k", "{\"a\":1}"]);
        assert_eq!(
            args.command,
            Command::Set {
                key: "k".to_string(),
                value: "{\"a\":1}".to_string(),
                ttl: 0,
                raw: false,
            }
        );
    }

    #[test]
    fn test_incr_negative_delta() {
        let args = CliArgs::parse_from(["test", "incr", "n", "-3", "--ttl", "60"]);
        assert_eq!(
            args.command,
            Command::Incr {
                key: "n".to_string(),
                delta: -3,
                ttl: 60,
            }
        );
    }

    #[test]
    fn test_decr_default_delta() {
        let args = CliArgs::parse_from(["test", "decr", "n"]);
        assert!(matches!(args.command, Command::Decr { delta: 1, .. }));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(CliArgs::try_parse_from(["test", "-v", "-q", "get", "k"]).is_err());
    }

    #[test]
    fn test_validation_zero_tries() {
        let args = CliArgs::parse_from(["test", "--tries", "0", "route", "k"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let args = CliArgs::parse_from(["test", "--io-timeout-ms", "0", "get", "k"]);
        assert!(args.validate().is_err());
    }
}
