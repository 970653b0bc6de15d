//! Persistence backends for cached embeddings.
//!
//! The cache talks to storage only through [`CacheBackend`], a key-value
//! interface shaped after the `embedding_cache` table:
//!
//! ```text
//! embedding_cache(key PRIMARY KEY, vector BLOB, model TEXT,
//!                 created_at INTEGER, last_accessed INTEGER,
//!                 access_count INTEGER)
//! ```
//!
//! Two backends ship with the crate: [`MemoryBackend`] for tests and
//! short-lived processes, and [`FileBackend`] which keeps a JSON snapshot on
//! disk.

mod file;
mod memory;
mod snapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::Result;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use snapshot::{CacheSnapshot, SNAPSHOT_VERSION, SnapshotEntry};

/// A cached embedding together with its access bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of the embedded text.
    pub key: String,

    /// The embedding vector.
    pub vector: Embedding,

    /// Model that produced the vector.
    pub model: String,

    /// Creation time in epoch milliseconds. Never changes after insert.
    pub created_at: i64,

    /// Last successful lookup in epoch milliseconds.
    pub last_accessed: i64,

    /// Number of successful lookups.
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a fresh entry that has not been read yet.
    pub fn new(
        key: impl Into<String>,
        vector: Embedding,
        model: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            key: key.into(),
            vector,
            model: model.into(),
            created_at: timestamp,
            last_accessed: timestamp,
            access_count: 0,
        }
    }

    /// Record a read at `now`.
    pub fn touch(&mut self, now: i64) {
        self.last_accessed = now.max(self.created_at).max(self.last_accessed);
        self.access_count += 1;
    }

    /// Approximate persisted size: vector blob plus key and model text.
    pub fn size_bytes(&self) -> u64 {
        (self.vector.len() * 4 + self.key.len() + self.model.len()) as u64
    }
}

/// Key-value persistence for cache entries.
///
/// Implementations must tolerate concurrent calls for different keys.
/// Concurrent `upsert`s of the same key resolve last-write-wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Read an entry and, in the same operation, bump its access fields.
    async fn get_and_touch(&self, key: &str, now: i64) -> Result<Option<CacheEntry>>;

    /// Replace-or-create an entry.
    async fn upsert(&self, entry: CacheEntry) -> Result<()>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;

    /// Delete up to `n` entries with the oldest `last_accessed`.
    ///
    /// Returns the number of entries removed.
    async fn delete_least_recent(&self, n: usize) -> Result<usize>;

    /// Delete every entry with `created_at < threshold`.
    async fn delete_created_before(&self, threshold: i64) -> Result<usize>;

    /// Remove all entries.
    async fn clear(&self) -> Result<()>;

    /// Sum of [`CacheEntry::size_bytes`] over all entries.
    async fn total_size_bytes(&self) -> Result<u64>;

    /// Copy of every stored entry, in no particular order.
    async fn entries(&self) -> Result<Vec<CacheEntry>>;

    /// Make pending writes durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
