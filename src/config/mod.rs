//! Configuration module

pub mod cli;
pub mod client_config;
pub mod file_config;

pub use cli::{CliArgs, Command};
pub use client_config::{parse_server_list, ClientConfig, DEFAULT_TRIES};
pub use file_config::{FileConfig, MemcacheSection, ServerList};
