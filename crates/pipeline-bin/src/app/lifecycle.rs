//! The `run` subcommand: stdin to collector.

use anyhow::Context;
use dispatch_pool::{shared, DispatchPool};
use event_cache::{EventCache, QueuedItem};
use http_shipper::HttpShipper;
use pipeline_config_and_utils::{Config, Paths};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on the time spent delivering what is left at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const STATUS_POLL: Duration = Duration::from_millis(50);

/// Run the pipeline until stdin closes or Ctrl-C is received.
pub async fn run(config: Config, paths: Paths) -> anyhow::Result<()> {
    paths
        .ensure_dirs()
        .with_context(|| format!("creating {}", paths.base_dir().display()))?;

    let cache = EventCache::open(config.cache_config(&paths));
    if !cache.is_persistent() {
        warn!("Cache is memory-only; queued events will not survive a restart");
    }
    info!(
        restored = cache.count(),
        capacity = cache.max_count(),
        collector = %config.collector_url,
        "Starting event pipeline"
    );

    let shipper = HttpShipper::new(config.shipper_config()).context("building HTTP client")?;
    let pool = DispatchPool::spawn(cache, Arc::new(shipper), config.pool_config());
    if shared::install(pool.clone()).is_err() {
        warn!("A shared dispatch pool was already installed");
    }

    let (stop_tx, mut stop_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, flushing");
            if let Some(pool) = shared::get() {
                pool.flush();
            }
            let _ = stop_tx.send(());
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    loop {
        tokio::select! {
            Ok(()) = &mut stop_rx => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    debug!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match envelope(&line, Uuid::new_v4()) {
                    Ok(item) => {
                        pool.push(item);
                        accepted += 1;
                    }
                    Err(e) => warn!(error = %e, "Skipping input line that is not JSON"),
                }
            }
        }
    }

    info!(accepted, pending = pool.pending_count(), "Input closed, draining");
    drain(&pool).await;
    persist(&pool).await;
    info!(pending = pool.pending_count(), "Event pipeline stopped");
    Ok(())
}

/// Flush repeatedly while batches keep making progress, bounded by
/// [`DRAIN_TIMEOUT`].
async fn drain(pool: &DispatchPool) {
    let result = tokio::time::timeout(DRAIN_TIMEOUT, async {
        loop {
            let before = pool.pending_count();
            if before == 0 {
                return;
            }
            pool.flush();
            wait_idle(pool).await;
            if pool.pending_count() >= before {
                return;
            }
        }
    })
    .await;

    if result.is_err() {
        warn!(
            pending = pool.pending_count(),
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Gave up waiting for in-flight delivery"
        );
    }
}

/// Write the queue to disk on the blocking pool.
async fn persist(pool: &DispatchPool) {
    let pool = pool.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || pool.cache().persist_now()).await {
        warn!(error = %e, "Final cache write did not complete");
    }
}

/// Wait until no flush is in flight.
async fn wait_idle(pool: &DispatchPool) {
    while let Some(status) = pool.status().await {
        if !status.is_flushing {
            return;
        }
        tokio::time::sleep(STATUS_POLL).await;
    }
}

/// Wrap one input line as a queued event with a fresh id.
///
/// Objects get an `id` field; any other JSON value is nested under `data`.
fn envelope(line: &str, id: Uuid) -> serde_json::Result<QueuedItem> {
    let id = id.to_string();
    let event = match serde_json::from_str::<Value>(line)? {
        Value::Object(mut fields) => {
            fields.insert("id".to_string(), Value::String(id.clone()));
            Value::Object(fields)
        }
        other => {
            let mut fields = Map::new();
            fields.insert("id".to_string(), Value::String(id.clone()));
            fields.insert("data".to_string(), other);
            Value::Object(fields)
        }
    };
    Ok(QueuedItem::new(id, serde_json::to_vec(&event)?))
}
