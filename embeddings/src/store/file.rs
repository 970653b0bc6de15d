//! File-backed cache backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::memory::EntryTable;
use super::{CacheBackend, CacheEntry, CacheSnapshot};
use crate::error::{EmbeddingError, Result};

/// Cache backend that mirrors its entries into a JSON snapshot file.
///
/// Every structural change (insert, delete, clear) is written to the file
/// atomically before returning. Access bookkeeping from reads is kept in
/// memory and written with the next structural change or an explicit
/// [`CacheBackend::flush`]. A failed write leaves the backend dirty, so the
/// next write or flush retries it.
///
/// The entry table is only locked while it is changed or copied; encoding
/// and file I/O happen under a separate write lock, so lookups never wait
/// on the disk.
pub struct FileBackend {
    path: PathBuf,
    table: Mutex<EntryTable>,
    dirty: AtomicBool,

    /// Serializes snapshot writes so an older copy never overwrites a newer one.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open the backend at `path`, loading an existing snapshot if present.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let table = if tokio::fs::try_exists(&path).await? {
            let snapshot = CacheSnapshot::read_from(&path).await.map_err(|e| {
                EmbeddingError::CacheUnavailable(format!("{}: {e}", path.display()))
            })?;
            let table = EntryTable::from_entries(snapshot.into_entries()?);
            info!("Loaded {} cache entries from {}", table.len(), path.display());
            table
        } else {
            EntryTable::default()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether in-memory state has not reached the file yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Apply `change` to the table and mark the backend dirty.
    async fn mutate<T>(&self, change: impl FnOnce(&mut EntryTable) -> T) -> T {
        let mut table = self.table.lock().await;
        let result = change(&mut table);
        self.dirty.store(true, Ordering::SeqCst);
        result
    }

    /// Write the current table if anything changed since the last write.
    async fn persist(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        // Changes made after this point set the flag again and are written
        // by their own call.
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let entries = self.table.lock().await.entries();
        let result = CacheSnapshot::from_entries(&entries)
            .write_to(&self.path)
            .await
            .map_err(|e| EmbeddingError::CacheUnavailable(format!("{}: {e}", self.path.display())));
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_and_touch(&self, key: &str, now: i64) -> Result<Option<CacheEntry>> {
        let entry = self.table.lock().await.get_and_touch(key, now);
        if entry.is_some() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(entry)
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        self.mutate(|table| table.upsert(entry)).await;
        self.persist().await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.table.lock().await.len())
    }

    async fn delete_least_recent(&self, n: usize) -> Result<usize> {
        let removed = self.mutate(|table| table.delete_least_recent(n)).await;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn delete_created_before(&self, threshold: i64) -> Result<usize> {
        let removed = self
            .mutate(|table| table.delete_created_before(threshold))
            .await;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.mutate(EntryTable::clear).await;
        self.persist().await
    }

    async fn total_size_bytes(&self) -> Result<u64> {
        Ok(self.table.lock().await.total_size_bytes())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.table.lock().await.entries())
    }

    async fn flush(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.persist().await?;
        debug!("Flushed embedding cache to {}", self.path.display());
        Ok(())
    }
}
