use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use resilient_sync::cache::CacheStore;
use resilient_sync::config::{load_config, SyncConfig};
use resilient_sync::connectivity::Connectivity;
use resilient_sync::observability::logging::init_logging;
use resilient_sync::queue::{OfflineQueue, OperationExecutor, QueuedOperation};
use resilient_sync::{FileStore, SyncError, SyncResult};

#[derive(Parser)]
#[command(name = "sync-inspect")]
#[command(about = "Inspect the persisted cache and offline queue", long_about = None)]
struct Cli {
    /// Config file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory, overriding `storage.path` from the config.
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pending offline operations
    Queue,
    /// List cache entries with age and freshness
    Cache,
    /// Remove expired cache entries
    Sweep,
    /// Drop every pending offline operation
    PurgeQueue,
}

/// Inspection never replays anything.
struct NoReplay;

#[async_trait]
impl OperationExecutor for NoReplay {
    async fn execute(&self, _operation: &QueuedOperation) -> SyncResult<()> {
        Err(SyncError::remote("unavailable", "replay disabled in sync-inspect"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SyncConfig::default(),
    };
    init_logging(&config.observability);

    let root = cli
        .data
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.path));
    let store = Arc::new(FileStore::open(&root)?);
    tracing::debug!(path = ?root, "Inspecting store");

    match cli.command {
        Commands::Queue => {
            let queue = open_queue(store, &config).await?;
            let pending = queue.pending().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else if pending.is_empty() {
                println!("Offline queue is empty");
            } else {
                println!("{:<36}  {:<6}  {:<24}  {:>8}", "ID", "KIND", "RESOURCE", "ATTEMPTS");
                for op in &pending {
                    let resource = match &op.resource_id {
                        Some(id) => format!("{}/{}", op.resource_kind, id),
                        None => op.resource_kind.clone(),
                    };
                    println!(
                        "{:<36}  {:<6}  {:<24}  {:>5}/{}",
                        op.id, op.kind, resource, op.attempts, op.max_attempts
                    );
                }
            }
        }
        Commands::Cache => {
            let cache = CacheStore::new(store, config.cache.key_prefix.clone());
            let entries = cache.entries().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Cache is empty");
            } else {
                println!("{:<40}  {:>10}  {:>10}  {}", "KEY", "AGE (s)", "TTL (s)", "STATE");
                for entry in &entries {
                    println!(
                        "{:<40}  {:>10}  {:>10}  {}",
                        entry.key,
                        entry.age().as_secs(),
                        entry.ttl().as_secs(),
                        if entry.is_fresh() { "fresh" } else { "stale" }
                    );
                }
            }
        }
        Commands::Sweep => {
            let cache = CacheStore::new(store, config.cache.key_prefix.clone());
            let removed = cache.clear_expired().await?;
            println!("Removed {removed} expired entries");
        }
        Commands::PurgeQueue => {
            let queue = open_queue(store, &config).await?;
            let dropped = queue.dequeue_all().await?;
            println!("Dropped {} queued operations", dropped.len());
        }
    }

    Ok(())
}

async fn open_queue(store: Arc<FileStore>, config: &SyncConfig) -> SyncResult<OfflineQueue> {
    let queue = OfflineQueue::new(store, Arc::new(NoReplay), Connectivity::offline(), &config.queue)
        .with_auto_drain(false);
    queue.load().await?;
    Ok(queue)
}
