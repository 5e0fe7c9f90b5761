//! Read-only subcommands.

use event_cache::CacheStore;
use pipeline_config_and_utils::{Config, Paths};

/// Print the pending count and the oldest ids from the cache file.
///
/// Only reads the file; a running pipeline is not disturbed.
pub fn print_status(config: &Config, paths: &Paths, limit: usize) -> anyhow::Result<()> {
    let store = CacheStore::new(paths.cache_file(&config.cache_file_name));
    let items = store.load()?.unwrap_or_default();

    println!("Cache file: {}", store.path().display());
    println!("Pending events: {} (max {})", items.len(), config.max_cache_count);

    if !items.is_empty() {
        println!("Oldest:");
        for item in items.iter().take(limit) {
            println!("  {} ({} bytes)", item.id, item.payload.len());
        }
        if items.len() > limit {
            println!("  ... and {} more", items.len() - limit);
        }
    }

    Ok(())
}

/// Print the effective configuration and resolved paths.
pub fn print_config(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    println!("Config file: {}", paths.config_file().display());
    println!("Cache file:  {}", paths.cache_file(&config.cache_file_name).display());
    println!("Log file:    {}", paths.log_file().display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
