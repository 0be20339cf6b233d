//! session-cache CLI: inspect and exercise a cache directory.

use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use session_cache::config::{Cli, Command, Config};
use session_cache::memory::MemoryManager;
use session_cache::stream::DataStream;
use session_cache::TieredCache;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "session_cache=debug"
    } else {
        "session_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("session-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.cache_dir {
        config.cache.cache_dir = dir;
    }

    info!(
        cache_dir = %config.cache.cache_dir.display(),
        memory = config.tiers.memory_budget,
        sqlite = config.tiers.sqlite_budget,
        columnar = config.tiers.columnar_budget,
        compressed = config.tiers.compressed_budget,
        "Configuration loaded"
    );

    match cli.command {
        Command::Stats => {
            // Inspecting must not wipe what is there.
            config.cache.clear_on_open = false;
            let cache = TieredCache::open(config.into()).context("opening cache")?;
            println!("{}", serde_json::to_string_pretty(&cache.get_stats())?);
            print!("{}", cache.metrics().encode());
        }
        Command::Memory => {
            let manager = MemoryManager::new(&config);
            manager.check_memory_pressure();
            println!("{}", serde_json::to_string_pretty(&manager.get_memory_report())?);
        }
        Command::Clear => {
            config.cache.clear_on_open = false;
            let mut cache = TieredCache::open(config.into()).context("opening cache")?;
            cache.clear();
            info!("All tiers cleared");
        }
        Command::Scan { path, chunk_size } => {
            let started = Instant::now();
            let mut stream = DataStream::from_lines(&path, config.stream.chunk_size)
                .with_context(|| format!("opening {}", path.display()))?;

            let chunk_size = chunk_size.max(1) as u64;
            while stream.next().is_some() {
                let processed = stream.metadata().processed_items;
                if processed % chunk_size == 0 {
                    info!(
                        processed,
                        progress = %format!("{:.1}%", stream.get_progress() * 100.0),
                        "Scanning"
                    );
                }
            }

            let meta = stream.metadata();
            info!(
                lines = meta.processed_items,
                bytes = meta.bytes_processed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                lines_per_sec = meta.throughput() as u64,
                "Scan complete"
            );
        }
    }

    Ok(())
}
