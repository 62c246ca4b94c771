use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::maintenance::{self, EvictionStats, TEMP_PREFIX};
use super::{CacheError, CacheKey, CacheStore};

/// Stores one file per key directly under the cache root. The directory
/// listing is the index.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    max_size: u64,
}

impl DiskCache {
    pub async fn open(root: PathBuf, max_size: u64) -> Result<Self> {
        async_fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create cache root {}", root.display()))?;
        let removed = maintenance::remove_temp_files(&root)
            .await
            .context("failed to clean cache temp files")?;
        if removed > 0 {
            debug!(removed, root = %root.display(), "removed leftover cache temp files");
        }
        info!(root = %root.display(), max_size, "cache store ready");
        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn entry_path(&self, key: CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    async fn write_entry(&self, key: CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        async_fs::create_dir_all(&self.root)
            .await
            .map_err(|err| CacheError::io(&self.root, err))?;

        let temp_path = self.temp_path();
        let result = async {
            let mut file = async_fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            drop(file);
            async_fs::rename(&temp_path, self.entry_path(key)).await
        }
        .await;

        if let Err(err) = result {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(CacheError::io(self.entry_path(key), err));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn exists(&self, key: CacheKey) -> bool {
        async_fs::metadata(self.entry_path(key))
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }

    async fn read(&self, key: CacheKey) -> Result<Vec<u8>, CacheError> {
        let path = self.entry_path(key);
        match async_fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(CacheError::NotFound(key)),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }

    async fn write(&self, key: CacheKey, bytes: &[u8]) -> Result<EvictionStats, CacheError> {
        self.write_entry(key, bytes).await?;
        info!(key = %key, bytes = bytes.len(), "saved response to cache");

        let total = self.total_size().await?;
        if total > self.max_size || self.max_size == 0 {
            return self.evict().await;
        }
        Ok(EvictionStats::default())
    }

    async fn total_size(&self) -> Result<u64, CacheError> {
        let entries = maintenance::scan_entries(&self.root).await?;
        Ok(maintenance::total_bytes(&entries))
    }

    async fn evict(&self) -> Result<EvictionStats, CacheError> {
        maintenance::evict_to_bound(&self.root, self.max_size).await
    }
}
