use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

mod key;
mod maintenance;
mod store;

pub use key::CacheKey;
pub use maintenance::EvictionStats;
pub use store::DiskCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry {0} not found")]
    NotFound(CacheKey),
    #[error("cache I/O failed for {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Size-keyed response cache shared by all connections.
///
/// Implementations keep no authoritative in-memory state: every call reflects
/// what is currently stored, including entries created by other processes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: CacheKey) -> bool;

    async fn read(&self, key: CacheKey) -> Result<Vec<u8>, CacheError>;

    /// Stores `bytes` under `key`, replacing any previous entry, then evicts
    /// older entries if the bound is exceeded.
    async fn write(&self, key: CacheKey, bytes: &[u8]) -> Result<EvictionStats, CacheError>;

    async fn total_size(&self) -> Result<u64, CacheError>;

    async fn evict(&self) -> Result<EvictionStats, CacheError>;
}
