//! In-memory cache backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CacheBackend, CacheEntry};
use crate::error::Result;

/// Entry map shared by the memory and file backends.
#[derive(Debug, Default)]
pub(crate) struct EntryTable {
    entries: HashMap<String, CacheEntry>,
}

impl EntryTable {
    pub(crate) fn from_entries(entries: Vec<CacheEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.upsert(entry);
        }
        table
    }

    pub(crate) fn get_and_touch(&mut self, key: &str, now: i64) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        Some(entry.clone())
    }

    pub(crate) fn upsert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn delete_least_recent(&mut self, n: usize) -> usize {
        if n == 0 || self.entries.is_empty() {
            return 0;
        }

        let mut order: Vec<(i64, &String)> = self
            .entries
            .values()
            .map(|e| (e.last_accessed, &e.key))
            .collect();
        // Ties on last_accessed fall back to key order so eviction is repeatable.
        order.sort();

        let victims: Vec<String> = order.into_iter().take(n).map(|(_, k)| k.clone()).collect();
        for key in &victims {
            self.entries.remove(key);
        }
        victims.len()
    }

    pub(crate) fn delete_created_before(&mut self, threshold: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created_at >= threshold);
        before - self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn total_size_bytes(&self) -> u64 {
        self.entries.values().map(CacheEntry::size_bytes).sum()
    }

    pub(crate) fn entries(&self) -> Vec<CacheEntry> {
        self.entries.values().cloned().collect()
    }
}

/// Cache backend that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    table: Mutex<EntryTable>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_and_touch(&self, key: &str, now: i64) -> Result<Option<CacheEntry>> {
        Ok(self.table.lock().await.get_and_touch(key, now))
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        self.table.lock().await.upsert(entry);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.table.lock().await.len())
    }

    async fn delete_least_recent(&self, n: usize) -> Result<usize> {
        Ok(self.table.lock().await.delete_least_recent(n))
    }

    async fn delete_created_before(&self, threshold: i64) -> Result<usize> {
        Ok(self.table.lock().await.delete_created_before(threshold))
    }

    async fn clear(&self) -> Result<()> {
        self.table.lock().await.clear();
        Ok(())
    }

    async fn total_size_bytes(&self) -> Result<u64> {
        Ok(self.table.lock().await.total_size_bytes())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.table.lock().await.entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(key: &str, created_at: i64) -> CacheEntry {
        CacheEntry::new(key, vec![0.25; 4], "test-model", created_at)
    }

    #[tokio::test]
    async fn test_get_and_touch_bumps_access_fields() {
        let backend = MemoryBackend::new();
        backend.upsert(entry("a", 1_000)).await.unwrap();

        let hit = backend.get_and_touch("a", 5_000).await.unwrap().unwrap();
        assert_eq!(hit.access_count, 1);
        assert_eq!(hit.last_accessed, 5_000);
        assert_eq!(hit.created_at, 1_000);

        assert!(backend.get_and_touch("missing", 5_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let backend = MemoryBackend::new();
        backend.upsert(entry("a", 1)).await.unwrap();
        let mut replacement = entry("a", 2);
        replacement.model = "other-model".to_string();
        backend.upsert(replacement).await.unwrap();

        assert_eq!(backend.count().await.unwrap(), 1);
        let stored = backend.entries().await.unwrap();
        assert_eq!(stored[0].model, "other-model");
    }

    #[tokio::test]
    async fn test_delete_least_recent_orders_by_access() {
        let backend = MemoryBackend::new();
        for (key, ts) in [("old", 100), ("mid", 200), ("new", 300)] {
            backend.upsert(entry(key, ts)).await.unwrap();
        }
        // Reading "old" makes it the most recently used.
        backend.get_and_touch("old", 400).await.unwrap();

        assert_eq!(backend.delete_least_recent(2).await.unwrap(), 2);
        let keys: Vec<String> = backend.entries().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["old"]);
    }

    #[tokio::test]
    async fn test_delete_created_before() {
        let backend = MemoryBackend::new();
        for (key, ts) in [("a", 100), ("b", 200), ("c", 300)] {
            backend.upsert(entry(key, ts)).await.unwrap();
        }

        assert_eq!(backend.delete_created_before(200).await.unwrap(), 1);
        assert_eq!(backend.delete_created_before(200).await.unwrap(), 0);
        assert_eq!(backend.count().await.unwrap(), 2);
    }
}
