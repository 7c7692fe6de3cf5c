use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use handlecache::{CacheConfig, FileId, HandleCache, LocalOpener, LogicalFile, DEFAULT_MAX_OPEN};

/// Read every file of a directory round-robin through a bounded handle cache
#[derive(Parser, Debug)]
#[command(name = "handlecache")]
struct Args {
    /// Directory whose regular files are read
    dir: PathBuf,

    /// Maximum number of simultaneously open files
    #[arg(long, env = "HANDLECACHE_MAX_OPEN", default_value_t = DEFAULT_MAX_OPEN)]
    max_open: usize,

    /// Bytes read from each file per turn
    #[arg(long, default_value_t = 4096)]
    chunk_size: usize,
}

/// Regular files directly under `dir`, sorted by name
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).context(format!("Failed to read directory: {:?}", dir))? {
        let entry = entry.context("Failed to read directory entry")?;
        let file_type = entry
            .file_type()
            .context(format!("Failed to stat: {:?}", entry.path()))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = CacheConfig::new(args.max_open)?;
    let chunk_size = args.chunk_size.max(1);

    let files = list_files(&args.dir)?;
    println!("Handle cache: {} files, max_open={}", files.len(), config.max_open());

    let mut cache = HandleCache::new(config, LocalOpener::new());
    let mut pending: Vec<(FileId, u64)> = files
        .into_iter()
        .map(|path| (cache.register(LogicalFile::read(path)), 0))
        .collect();

    let mut buf = vec![0u8; chunk_size];
    let mut totals = Vec::new();

    // One chunk per file per turn, so the cache keeps evicting and reopening.
    while !pending.is_empty() {
        let mut still_pending = Vec::with_capacity(pending.len());
        for (id, bytes) in pending {
            match cache.read(id, &mut buf) {
                Ok(0) => {
                    let path = cache.file(id)?.path().to_path_buf();
                    cache.forget(id)?;
                    totals.push((path, bytes));
                }
                Ok(n) => still_pending.push((id, bytes + n as u64)),
                Err(e) if e.is_fatal() => {
                    return Err(e).context("Unrecoverable handle cache failure");
                }
                Err(e) => {
                    warn!("Skipping file: {:#}", anyhow::Error::from(e));
                    cache.forget(id)?;
                }
            }
        }
        pending = still_pending;

        for failure in cache.take_eviction_failures() {
            warn!("Eviction close failed: {:#}", anyhow::Error::from(failure));
        }
    }

    cache.release_all()?;

    for (path, bytes) in &totals {
        println!("  {:>12} {}", bytes, path.display());
    }

    let stats = cache.stats();
    info!("Cache stats: {:?}", stats);
    println!();
    println!(
        "hits={} misses={} opens={} evictions={} open_failures={}",
        stats.hits, stats.misses, stats.opens, stats.evictions, stats.open_failures
    );

    Ok(())
}
