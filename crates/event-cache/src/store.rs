//! Backing file for the event cache.
//!
//! The whole queue is written as a single JSON document and replaced
//! atomically (temp file, fsync, rename, directory fsync), so a crash mid-write
//! leaves either the previous snapshot or the new one on disk.

use crate::{CacheError, CacheResult, QueuedItem};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Base64 engine for payload bytes.
const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Current on-disk format version.
pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredFile {
    version: u32,
    items: Vec<StoredItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    id: String,
    payload: String,
}

/// Reads and writes the snapshot file of one cache instance.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored items, oldest first.
    ///
    /// Returns `Ok(None)` when no backing file exists yet.
    pub fn load(&self) -> CacheResult<Option<Vec<QueuedItem>>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        decode(&bytes).map(Some)
    }

    /// Atomically replace the backing file with `items`.
    pub fn save(&self, items: &[QueuedItem]) -> CacheResult<()> {
        let bytes = encode(items)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }
}

fn encode(items: &[QueuedItem]) -> CacheResult<Vec<u8>> {
    let file = StoredFile {
        version: STORE_FORMAT_VERSION,
        items: items
            .iter()
            .map(|item| StoredItem {
                id: item.id.clone(),
                payload: BASE64.encode(&item.payload),
            })
            .collect(),
    };
    Ok(serde_json::to_vec(&file)?)
}

fn decode(bytes: &[u8]) -> CacheResult<Vec<QueuedItem>> {
    let file: StoredFile = serde_json::from_slice(bytes)?;
    if file.version != STORE_FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion(file.version));
    }

    file.items
        .into_iter()
        .map(|stored| {
            let payload = BASE64.decode(stored.payload.as_bytes()).map_err(|e| {
                CacheError::Decode(format!("invalid payload for item {}: {}", stored.id, e))
            })?;
            Ok(QueuedItem {
                id: stored.id,
                payload,
            })
        })
        .collect()
}

fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no file name"))?;

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = fs::File::open(&dir) {
            let _ = parent_dir.sync_all();
        }

        Ok(())
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    write_result
}
