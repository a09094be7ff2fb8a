//! memcache-ring - command-line memcached client
//!
//! Runs a single get/set/delete/incr/decr against a ring of memcached
//! servers, or shows the servers a key routes to.

use anyhow::Result;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use memcache_ring::config::{CliArgs, ClientConfig, Command, FileConfig};
use memcache_ring::{CachedValue, MemcacheRing};

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn print_counter(value: Option<u64>) {
    match value {
        Some(value) => println!("{}", value),
        None => println!("(not a counter)"),
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Setup logging
    setup_logging(args.verbose, args.quiet);

    let file = match args.config {
        Some(ref path) => {
            info!("Loading config from: {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let config = ClientConfig::resolve(&args, file.as_ref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let client = MemcacheRing::from_config(&config)?;

    match args.command {
        Command::Get { ref key } => match client.get(key)? {
            Some(CachedValue::Json(value)) => println!("{}", value),
            Some(CachedValue::Raw(bytes)) => println!("{}", String::from_utf8_lossy(&bytes)),
            None => println!("(miss)"),
        },
        Command::Set {
            ref key,
            ref value,
            ttl,
            raw,
        } => {
            if raw {
                client.set_raw(key, value.as_bytes(), ttl)?;
            } else {
                let json = serde_json::from_str::<serde_json::Value>(value)
                    .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
                client.set(key, &json, ttl)?;
            }
            println!("OK");
        }
        Command::Delete { ref key } => {
            client.delete(key)?;
            println!("OK");
        }
        Command::Incr { ref key, delta, ttl } => print_counter(client.incr(key, delta, ttl)?),
        Command::Decr { ref key, delta, ttl } => print_counter(client.decr(key, delta, ttl)?),
        Command::Route { ref key } => {
            for (i, server) in client.route(key).iter().enumerate() {
                let limited = if client.error_limiter().is_eligible(&server.id) {
                    ""
                } else {
                    " (error limited)"
                };
                println!("{}. {}{}", i + 1, server, limited);
            }
        }
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
