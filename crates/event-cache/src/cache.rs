//! In-memory event queue with coalesced persistence.
//!
//! # Persistence
//!
//! Every mutation bumps a monotonic write-request counter. The first mutation
//! after an idle period wakes the writer thread, which waits for the debounce
//! interval and then snapshots the queue together with the counter value. If
//! the counter moved while the snapshot was being written, the writer repeats
//! immediately with a fresh snapshot; otherwise it goes idle again. The file
//! therefore converges to the last in-memory state once mutations stop.
//!
//! ```text
//! write/remove ──▶ entries (Mutex) ──▶ write_request_count += 1
//!                                  └─▶ schedule (if idle) ──▶ writer thread
//!                                                              │ sleep(debounce)
//!                                                              ▼
//!                                                     snapshot ─▶ CacheStore::save
//! ```
//!
//! Read or write failures are logged and the cache continues memory-only.

use crate::{CacheStore, QueuedItem};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default capacity of a cache.
pub const DEFAULT_MAX_COUNT: usize = 1000;

/// Default delay between the first mutation and the disk write it triggers.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(200);

/// Construction parameters for an [`EventCache`].
#[derive(Debug, Clone)]
pub struct EventCacheConfig {
    /// Maximum number of items kept; the oldest are evicted beyond this.
    pub max_count: usize,
    /// Debounce interval for coalesced disk writes.
    pub persist_debounce: Duration,
    /// Backing file. `None` keeps the cache memory-only.
    pub file_path: Option<PathBuf>,
}

impl Default for EventCacheConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            persist_debounce: DEFAULT_PERSIST_DEBOUNCE,
            file_path: None,
        }
    }
}

#[derive(Default)]
struct Entries {
    order: VecDeque<QueuedItem>,
    ids: HashSet<String>,
}

impl Entries {
    fn from_loaded(items: Vec<QueuedItem>, max_count: usize) -> (Self, usize) {
        let mut entries = Entries::default();
        let mut duplicates = 0;
        for item in items {
            if entries.ids.insert(item.id.clone()) {
                entries.order.push_back(item);
            } else {
                duplicates += 1;
            }
        }
        let evicted = entries.evict_to(max_count);
        (entries, evicted + duplicates)
    }

    /// Drop items from the front until at most `max_count` remain.
    fn evict_to(&mut self, max_count: usize) -> usize {
        let mut evicted = 0;
        while self.order.len() > max_count {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest.id);
                evicted += 1;
            }
        }
        evicted
    }
}

/// State shared between the cache handle and its writer thread.
struct Shared {
    entries: Mutex<Entries>,
    store: Option<CacheStore>,
    persistence_enabled: AtomicBool,
    write_request_count: AtomicU64,
    write_scheduled: AtomicBool,
    /// Serialises debounced writes with [`EventCache::persist_now`].
    save_lock: Mutex<()>,
    debounce: Duration,
    #[cfg(test)]
    saves: AtomicU64,
    /// Runs after the snapshot is taken and before it is saved.
    #[cfg(test)]
    before_save: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl Shared {
    fn persistence_active(&self) -> bool {
        self.store.is_some() && self.persistence_enabled.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn run_save_hook(&self) {
        if let Some(hook) = self.before_save.lock().as_ref() {
            hook();
        }
    }

    #[cfg(not(test))]
    fn run_save_hook(&self) {}

    /// Write the current queue to disk and return the write-request count the
    /// snapshot corresponds to.
    fn write_snapshot(&self) -> u64 {
        let _guard = self.save_lock.lock();
        let (snapshot, seen) = {
            let entries = self.entries.lock();
            let snapshot: Vec<QueuedItem> = entries.order.iter().cloned().collect();
            (snapshot, self.write_request_count.load(Ordering::SeqCst))
        };

        let Some(store) = self.store.as_ref() else {
            return seen;
        };
        if !self.persistence_enabled.load(Ordering::SeqCst) {
            return seen;
        }

        self.run_save_hook();

        match store.save(&snapshot) {
            Ok(()) => {
                #[cfg(test)]
                self.saves.fetch_add(1, Ordering::SeqCst);
                debug!(
                    path = %store.path().display(),
                    count = snapshot.len(),
                    "Persisted event cache"
                );
            }
            Err(e) => {
                self.persistence_enabled.store(false, Ordering::SeqCst);
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Failed to persist event cache, continuing memory-only"
                );
            }
        }
        seen
    }
}

/// Capacity-bounded, order-preserving store of pending items.
///
/// All operations act on the in-memory view and never wait for disk I/O,
/// except [`persist_now`](Self::persist_now). The cache is `Sync` and may be
/// shared behind an `Arc`.
pub struct EventCache {
    shared: Arc<Shared>,
    max_count: usize,
    schedule_tx: Option<mpsc::Sender<()>>,
}

impl EventCache {
    /// Open a cache, restoring any items found in the backing file.
    ///
    /// Never fails: an unreadable backing file is logged and the cache runs
    /// memory-only for the lifetime of this instance.
    pub fn open(config: EventCacheConfig) -> Self {
        let store = config.file_path.map(CacheStore::new);
        let mut persistence_enabled = store.is_some();

        let loaded = match store.as_ref().map(CacheStore::load) {
            Some(Ok(Some(items))) => items,
            Some(Ok(None)) | None => Vec::new(),
            Some(Err(e)) => {
                persistence_enabled = false;
                warn!(
                    path = %store.as_ref().map(|s| s.path().display().to_string()).unwrap_or_default(),
                    error = %e,
                    "Failed to load event cache, continuing memory-only"
                );
                Vec::new()
            }
        };

        let (entries, dropped) = Entries::from_loaded(loaded, config.max_count);
        if let Some(store) = store.as_ref() {
            info!(
                path = %store.path().display(),
                count = entries.order.len(),
                dropped,
                "Loaded event cache"
            );
        }

        let shared = Arc::new(Shared {
            entries: Mutex::new(entries),
            store,
            persistence_enabled: AtomicBool::new(persistence_enabled),
            write_request_count: AtomicU64::new(0),
            write_scheduled: AtomicBool::new(false),
            save_lock: Mutex::new(()),
            debounce: config.persist_debounce,
            #[cfg(test)]
            saves: AtomicU64::new(0),
            #[cfg(test)]
            before_save: Mutex::new(None),
        });

        let schedule_tx = if shared.persistence_active() {
            spawn_writer(shared.clone())
        } else {
            None
        };

        Self {
            shared,
            max_count: config.max_count,
            schedule_tx,
        }
    }

    /// Create a memory-only cache.
    pub fn in_memory(max_count: usize) -> Self {
        Self::open(EventCacheConfig {
            max_count,
            ..Default::default()
        })
    }

    /// Append items to the tail, evicting the oldest items beyond capacity.
    ///
    /// Items whose id is already queued are skipped. If the batch alone is
    /// larger than the capacity, only its last `max_count` items survive.
    pub fn write_to_tail<I>(&self, items: I)
    where
        I: IntoIterator<Item = QueuedItem>,
    {
        let mut appended = 0usize;
        let mut skipped = 0usize;
        let evicted = {
            let mut entries = self.shared.entries.lock();
            for item in items {
                if entries.ids.contains(&item.id) {
                    skipped += 1;
                    continue;
                }
                entries.ids.insert(item.id.clone());
                entries.order.push_back(item);
                appended += 1;
            }
            if appended == 0 {
                0
            } else {
                let evicted = entries.evict_to(self.max_count);
                self.shared
                    .write_request_count
                    .fetch_add(1, Ordering::SeqCst);
                evicted
            }
        };

        if skipped > 0 {
            debug!(count = skipped, "Skipped items with duplicate ids");
        }
        if evicted > 0 {
            debug!(
                count = evicted,
                max_count = self.max_count,
                "Evicted oldest items over capacity"
            );
        }
        if appended > 0 {
            self.schedule_persist();
        }
    }

    /// Return up to `count` of the oldest items without removing them.
    pub fn read_from_head(&self, count: usize) -> Vec<QueuedItem> {
        let entries = self.shared.entries.lock();
        entries.order.iter().take(count).cloned().collect()
    }

    /// Remove every item whose id is in `ids`, keeping the order of the rest.
    ///
    /// Unknown ids are ignored. Returns the number of items removed.
    pub fn remove<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let targets: HashSet<&str> = ids.iter().map(AsRef::as_ref).collect();

        let removed = {
            let mut entries = self.shared.entries.lock();
            let before = entries.order.len();
            let Entries { order, ids: index } = &mut *entries;
            order.retain(|item| {
                if targets.contains(item.id.as_str()) {
                    index.remove(&item.id);
                    false
                } else {
                    true
                }
            });
            let removed = before - order.len();
            if removed > 0 {
                self.shared
                    .write_request_count
                    .fetch_add(1, Ordering::SeqCst);
            }
            removed
        };

        if removed > 0 {
            self.schedule_persist();
        }
        removed
    }

    /// Number of items currently queued.
    pub fn count(&self) -> usize {
        self.shared.entries.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Backing file, if the cache was opened with one.
    pub fn file_path(&self) -> Option<&Path> {
        self.shared.store.as_ref().map(CacheStore::path)
    }

    /// Whether mutations are still being written to disk.
    pub fn is_persistent(&self) -> bool {
        self.shared.persistence_active()
    }

    /// Whether a debounced write is scheduled or in progress.
    pub fn is_write_pending(&self) -> bool {
        self.shared.write_scheduled.load(Ordering::SeqCst)
    }

    /// Synchronously write the current queue to disk.
    ///
    /// Used on shutdown or when the host is about to be suspended. A no-op
    /// for memory-only caches.
    pub fn persist_now(&self) {
        if self.shared.persistence_active() {
            self.shared.write_snapshot();
        }
    }

    fn schedule_persist(&self) {
        if !self.shared.persistence_active() {
            return;
        }
        let Some(tx) = self.schedule_tx.as_ref() else {
            return;
        };
        if self
            .shared
            .write_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            && tx.send(()).is_err()
        {
            self.shared.write_scheduled.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for EventCache {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish its pending write and exit.
        self.schedule_tx.take();
    }
}

impl std::fmt::Debug for EventCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCache")
            .field("count", &self.count())
            .field("max_count", &self.max_count)
            .field("file_path", &self.file_path())
            .finish_non_exhaustive()
    }
}

fn spawn_writer(shared: Arc<Shared>) -> Option<mpsc::Sender<()>> {
    let (tx, rx) = mpsc::channel();
    let worker_shared = shared.clone();
    match thread::Builder::new()
        .name("event-cache-writer".to_string())
        .spawn(move || run_writer(worker_shared, rx))
    {
        Ok(_) => Some(tx),
        Err(e) => {
            shared.persistence_enabled.store(false, Ordering::SeqCst);
            warn!(error = %e, "Failed to start event cache writer, continuing memory-only");
            None
        }
    }
}

fn run_writer(shared: Arc<Shared>, rx: mpsc::Receiver<()>) {
    while rx.recv().is_ok() {
        thread::sleep(shared.debounce);

        loop {
            let seen = shared.write_snapshot();
            if shared.write_request_count.load(Ordering::SeqCst) != seen {
                continue;
            }

            shared.write_scheduled.store(false, Ordering::SeqCst);

            // A mutation may have landed between the check and the clear
            // without scheduling itself.
            if shared.write_request_count.load(Ordering::SeqCst) != seen
                && shared
                    .write_scheduled
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                continue;
            }
            break;
        }
    }
    debug!("Event cache writer stopped");
}
