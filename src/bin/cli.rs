//! CellarKV CLI
//!
//! Command-line interface over a local CellarKV data directory.

use std::process::ExitCode;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use cellarkv::{CellarError, Config, Environment, Result, Store, StoreRegistry, WalSyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// CellarKV CLI
#[derive(Parser, Debug)]
#[command(name = "cellarkv")]
#[command(about = "Embedded multi-store key-value environment")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./cellarkv_data")]
    data_dir: String,

    /// Maximum number of named stores
    #[arg(long, default_value = "1024")]
    max_stores: usize,

    /// Capacity ceiling in MB (key + value bytes)
    #[arg(long, default_value = "2000")]
    map_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List store names
    Stores,

    /// Create a store (no-op if it exists)
    Create {
        name: String,

        /// Allow duplicate values per key
        #[arg(long)]
        dup: bool,
    },

    /// Remove a store and all of its records
    #[command(name = "drop")]
    Remove { name: String },

    /// Put a key-value pair
    Put {
        store: String,
        key: String,
        value: String,
    },

    /// Get the value of a key
    Get { store: String, key: String },

    /// Delete a key (all of its values)
    Del { store: String, key: String },

    /// List records in key order
    Scan {
        store: String,

        /// Only keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,

        /// Highest key first
        #[arg(short, long)]
        reverse: bool,
    },

    /// Append a value under a new time-ordered key
    Post { store: String, value: String },

    /// Remove and print the lowest record
    Pop { store: String },

    /// Show environment statistics
    Stat,

    /// Fold the WAL into the checkpoint file
    Checkpoint,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cellarkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let map_size = match map_size_bytes(args.map_mb) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .max_stores(args.max_stores)
        .map_size(map_size)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build();

    let env = match Environment::open(config) {
        Ok(env) => env,
        Err(e) => {
            tracing::error!("Failed to open environment: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&env, args.command);
    let stopped = env.stop();

    match outcome.and(stopped) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(env: &Environment, command: Commands) -> Result<()> {
    match command {
        Commands::Stores => {
            for name in env.names() {
                println!("{}", show(&name));
            }
        }
        Commands::Create { name, dup } => {
            let store = env.create_store(&name, dup)?;
            println!("{} (duplicates: {})", store.name_lossy(), store.is_duplicates());
        }
        Commands::Remove { name } => {
            let removed = env.remove(name.as_bytes())?;
            println!("{}", if removed { "removed" } else { "(not found)" });
        }
        Commands::Put { store, key, value } => {
            open_store(env, &store)?.put(key, value)?;
            println!("OK");
        }
        Commands::Get { store, key } => match existing_store(env, &store)?.get(&key)? {
            Some(value) => println!("{}", show(&value)),
            None => println!("(nil)"),
        },
        Commands::Del { store, key } => {
            let removed = existing_store(env, &store)?.remove(&key)?;
            println!("{}", if removed { "1" } else { "0" });
        }
        Commands::Scan {
            store,
            prefix,
            limit,
            reverse,
        } => {
            let store = existing_store(env, &store)?;
            let prefix = prefix.unwrap_or_default();
            let records: Box<dyn Iterator<Item = (Bytes, Bytes)>> = if reverse {
                Box::new(store.iter_rev()?)
            } else {
                Box::new(store.iter_from(&prefix)?)
            };
            let matching = records
                .skip_while(|(key, _)| reverse && !key.starts_with(prefix.as_bytes()))
                .take_while(|(key, _)| key.starts_with(prefix.as_bytes()))
                .take(limit.unwrap_or(usize::MAX));
            for (key, value) in matching {
                println!("{}\t{}", show(&key), show(&value));
            }
        }
        Commands::Post { store, value } => match open_store(env, &store)?.post(value)? {
            Some(key) => println!("{}", show(&key)),
            None => println!("(key collision, not stored)"),
        },
        Commands::Pop { store } => match existing_store(env, &store)?.pop()? {
            Some((key, value)) => println!("{}\t{}", show(&key), show(&value)),
            None => println!("(empty)"),
        },
        Commands::Stat => {
            let stat = env.stat()?;
            println!(
                "stores={} entries={} payload={}B map_size={}B ({:.2}%) lsn={} wal={}B",
                stat.stores,
                stat.entries,
                stat.payload_bytes,
                stat.map_size,
                stat.fill_ratio() * 100.0,
                stat.last_lsn,
                stat.wal_bytes
            );
            for store in &stat.per_store {
                println!(
                    "  {}\tdup={}\tentries={}\tkeys={}\tpayload={}B",
                    show(&store.name),
                    store.duplicates,
                    store.entries,
                    store.keys,
                    store.payload_bytes
                );
            }
        }
        Commands::Checkpoint => {
            let meta = env.checkpoint()?;
            println!(
                "checkpoint lsn={} stores={} records={} size={}B",
                meta.last_lsn, meta.store_count, meta.record_count, meta.file_size
            );
        }
    }
    Ok(())
}

/// Store for writes; created on first use
fn open_store(registry: &dyn StoreRegistry, name: &str) -> Result<Store> {
    registry.create(name.as_bytes())
}

/// Store for reads; must already exist
fn existing_store(registry: &dyn StoreRegistry, name: &str) -> Result<Store> {
    registry
        .get(name.as_bytes())?
        .ok_or_else(|| CellarError::StoreNotFound(name.to_string()))
}

fn show(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// `--map-mb` in bytes
fn map_size_bytes(map_mb: u64) -> Result<u64> {
    map_mb
        .checked_mul(1024 * 1024)
        .ok_or_else(|| CellarError::Config(format!("--map-mb {} overflows a byte count", map_mb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_size_bytes() {
        assert_eq!(map_size_bytes(2).unwrap(), 2 * 1024 * 1024);
        assert_eq!(map_size_bytes(u64::MAX >> 20).unwrap(), (u64::MAX >> 20) << 20);
        assert!(matches!(
            map_size_bytes((u64::MAX >> 20) + 1),
            Err(CellarError::Config(_))
        ));
        assert!(matches!(map_size_bytes(u64::MAX), Err(CellarError::Config(_))));
    }

    #[test]
    fn test_args_accept_huge_map_mb() {
        // Parsing succeeds; the overflow is reported as a config error
        let args = Args::try_parse_from(["cellarkv", "--map-mb", "18446744073709551615", "stat"])
            .unwrap();
        assert!(map_size_bytes(args.map_mb).is_err());
    }
}
