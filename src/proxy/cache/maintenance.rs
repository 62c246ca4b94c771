use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs as async_fs;
use tracing::{info, warn};

use super::{CacheError, CacheKey};

pub(super) const TEMP_PREFIX: &str = "tmp_";

/// One entry file as seen by a directory scan.
#[derive(Debug, Clone)]
pub(super) struct EntryFile {
    pub(super) key: CacheKey,
    pub(super) path: PathBuf,
    pub(super) size: u64,
    pub(super) modified: SystemTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub removed: u64,
    pub bytes_reclaimed: u64,
}

pub(super) async fn scan_entries(root: &Path) -> Result<Vec<EntryFile>, CacheError> {
    let mut dir = match async_fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(CacheError::io(root, err)),
    };

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|err| CacheError::io(root, err))?
    {
        let name = entry.file_name();
        let Some(key) = name.to_str().and_then(CacheKey::from_file_name) else {
            continue;
        };
        let path = entry.path();
        // Entries can disappear between listing and stat when another
        // connection evicts concurrently.
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(CacheError::io(&path, err)),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push(EntryFile {
            key,
            path,
            size: metadata.len(),
            modified,
        });
    }
    Ok(entries)
}

pub(super) fn total_bytes(entries: &[EntryFile]) -> u64 {
    entries
        .iter()
        .fold(0u64, |total, entry| total.saturating_add(entry.size))
}

fn oldest_first(a: &EntryFile, b: &EntryFile) -> Ordering {
    a.modified.cmp(&b.modified).then(a.key.cmp(&b.key))
}

/// Picks the entries to delete so the remaining total fits in `max_size`,
/// oldest modification time first, ties broken by key. A zero bound retains
/// nothing, not even empty entries.
pub(super) fn eviction_plan(mut entries: Vec<EntryFile>, max_size: u64) -> Vec<EntryFile> {
    entries.sort_by(oldest_first);
    if max_size == 0 {
        return entries;
    }
    let mut total = total_bytes(&entries);
    if total <= max_size {
        return Vec::new();
    }

    let mut victims = Vec::new();
    for entry in entries {
        if total <= max_size {
            break;
        }
        total = total.saturating_sub(entry.size);
        victims.push(entry);
    }
    victims
}

pub(super) async fn evict_to_bound(root: &Path, max_size: u64) -> Result<EvictionStats, CacheError> {
    let entries = scan_entries(root).await?;
    let victims = eviction_plan(entries, max_size);

    let mut stats = EvictionStats::default();
    let mut first_error = None;
    for victim in victims {
        match async_fs::remove_file(&victim.path).await {
            Ok(()) => {
                info!(key = %victim.key, bytes = victim.size, "removed oldest cache entry");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    error = %err,
                    path = %victim.path.display(),
                    "failed to remove evicted cache entry"
                );
                first_error.get_or_insert(CacheError::io(&victim.path, err));
                continue;
            }
        }
        crate::metrics::record_cache_eviction(victim.size);
        stats.removed += 1;
        stats.bytes_reclaimed = stats.bytes_reclaimed.saturating_add(victim.size);
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(stats),
    }
}

pub(super) async fn remove_temp_files(root: &Path) -> Result<usize, CacheError> {
    let mut dir = match async_fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(CacheError::io(root, err)),
    };
    let mut removed = 0;
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|err| CacheError::io(root, err))?
    {
        let is_temp = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(TEMP_PREFIX))
            .unwrap_or(false);
        if is_temp && async_fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
