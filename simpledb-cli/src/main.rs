//! SimpleDB operator tool
//!
//! Opens a data directory, runs one command, and closes it with a flush.

use anyhow::Context;
use clap::{Parser, Subcommand};
use simpledb_core::{StorageConfig, StorageEngine};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "simpledb")]
#[command(version, about = "SimpleDB helper tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the value stored under a key
    Get {
        #[arg(long)]
        db: PathBuf,
        cf: String,
        key: String,
    },
    /// Store a value, creating the column family if needed
    Put {
        #[arg(long)]
        db: PathBuf,
        cf: String,
        key: String,
        value: String,
    },
    /// Delete a key
    Delete {
        #[arg(long)]
        db: PathBuf,
        cf: String,
        key: String,
    },
    /// List live entries whose key starts with a prefix
    Scan {
        #[arg(long)]
        db: PathBuf,
        cf: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Write memtables out and truncate the WAL
    Flush {
        #[arg(long)]
        db: PathBuf,
    },
    /// Merge segments in every column family
    Compact {
        #[arg(long)]
        db: PathBuf,
    },
    /// Print engine metrics as JSON
    Metrics {
        #[arg(long)]
        db: PathBuf,
    },
    /// List column families
    Cfs {
        #[arg(long)]
        db: PathBuf,
    },
}

impl Command {
    fn db(&self) -> &Path {
        match self {
            Command::Get { db, .. }
            | Command::Put { db, .. }
            | Command::Delete { db, .. }
            | Command::Scan { db, .. }
            | Command::Flush { db }
            | Command::Compact { db }
            | Command::Metrics { db }
            | Command::Cfs { db } => db,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let db = cli.cmd.db().to_path_buf();
    let config = StorageConfig::from_env(&db)
        .with_context(|| format!("invalid configuration for {}", db.display()))?;
    let engine = StorageEngine::new(config)
        .with_context(|| format!("failed to open {}", db.display()))?;

    let result = run(&engine, cli.cmd);
    engine.close(true).context("failed to close database")?;
    result
}

fn run(engine: &StorageEngine, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Get { cf, key, .. } => match engine.get(&cf, key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => anyhow::bail!("key not found: {cf}/{key}"),
        },
        Command::Put { cf, key, value, .. } => {
            let previous = engine.put(&cf, key.as_bytes(), value.as_bytes())?;
            if let Some(previous) = previous {
                info!(previous = %String::from_utf8_lossy(&previous), "Replaced existing value");
            }
        }
        Command::Delete { cf, key, .. } => {
            if engine.delete(&cf, key.as_bytes())?.is_none() {
                eprintln!("key not found: {cf}/{key}");
            }
        }
        Command::Scan { cf, prefix, .. } => {
            let mut count = 0usize;
            for (key, value) in engine.prefix_iterator(&cf, prefix.as_bytes())? {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
                count += 1;
            }
            eprintln!("{count} entries");
        }
        Command::Flush { .. } => engine.flush()?,
        Command::Compact { .. } => engine.compact()?,
        Command::Metrics { .. } => {
            let metrics = engine.metrics()?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Command::Cfs { .. } => {
            for cf in engine.list_cfs()? {
                println!("{cf}");
            }
        }
    }
    Ok(())
}
