//! Portable cache snapshots for backup and warm start.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::CacheEntry;
use crate::error::{EmbeddingError, Result};
use crate::{now_millis, vector};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One cache row in a snapshot. The vector is stored as base64 of its
/// little-endian `f32` bytes so it round-trips bit for bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub vector: String,
    pub dimension: usize,
    pub model: String,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
}

impl SnapshotEntry {
    /// Encode a cache entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            vector: STANDARD.encode(vector::to_bytes(&entry.vector)),
            dimension: entry.vector.len(),
            model: entry.model.clone(),
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
        }
    }

    /// Decode back into a cache entry, checking the declared dimension.
    pub fn into_entry(self) -> Result<CacheEntry> {
        let bytes = STANDARD
            .decode(self.vector.as_bytes())
            .map_err(|e| EmbeddingError::Snapshot(format!("{}: {e}", self.key)))?;
        let decoded = vector::from_bytes(&bytes)?;
        if decoded.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: decoded.len(),
            });
        }

        Ok(CacheEntry {
            key: self.key,
            vector: decoded,
            model: self.model,
            created_at: self.created_at,
            last_accessed: self.last_accessed.max(self.created_at),
            access_count: self.access_count,
        })
    }
}

/// A full dump of a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub exported_at: i64,
    pub entries: Vec<SnapshotEntry>,
}

impl CacheSnapshot {
    /// Build a snapshot from cache entries, sorted by key.
    pub fn from_entries(entries: &[CacheEntry]) -> Self {
        let mut entries: Vec<SnapshotEntry> = entries.iter().map(SnapshotEntry::from_entry).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            version: SNAPSHOT_VERSION,
            exported_at: now_millis(),
            entries,
        }
    }

    /// Decode every entry.
    pub fn into_entries(self) -> Result<Vec<CacheEntry>> {
        if self.version != SNAPSHOT_VERSION {
            return Err(EmbeddingError::Snapshot(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        self.entries.into_iter().map(SnapshotEntry::into_entry).collect()
    }

    /// Number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the snapshot as JSON, atomically replacing `path`.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_vec(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using a temp file
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Wrote {} cache entries to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Read a snapshot written by [`CacheSnapshot::write_to`].
    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_entry_round_trip_is_bit_exact() {
        let mut entry = CacheEntry::new("k", vec![0.1, -2.5e-7, 3.0e30, -0.0], "model", 10);
        entry.touch(20);

        let decoded = SnapshotEntry::from_entry(&entry).into_entry().unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&decoded.vector), bits(&entry.vector));
        assert_eq!(decoded.access_count, 1);
        assert_eq!(decoded.last_accessed, 20);
    }

    #[test]
    fn test_declared_dimension_is_checked() {
        let entry = CacheEntry::new("k", vec![1.0, 2.0], "model", 0);
        let mut encoded = SnapshotEntry::from_entry(&entry);
        encoded.dimension = 3;
        assert!(encoded.into_entry().is_err());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut snapshot = CacheSnapshot::from_entries(&[]);
        snapshot.version = 99;
        assert!(snapshot.into_entries().is_err());
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/cache.json");
        let entries = vec![
            CacheEntry::new("b", vec![1.0; 3], "m", 2),
            CacheEntry::new("a", vec![0.5; 3], "m", 1),
        ];

        let snapshot = CacheSnapshot::from_entries(&entries);
        snapshot.write_to(&path).await.unwrap();

        let loaded = CacheSnapshot::read_from(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.entries[0].key, "a");
        assert_eq!(loaded.into_entries().unwrap().len(), 2);
    }
}
