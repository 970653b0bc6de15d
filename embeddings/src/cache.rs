//! Embedding cache with LRU capacity and TTL expiry.
//!
//! `EmbeddingCache` sits between the service and a [`CacheBackend`]. It owns
//! the two retention rules:
//!
//! - **Capacity (LRU)** is enforced synchronously on every insert. When the
//!   backend holds `max_entries` or more, the least recently accessed entries
//!   are removed in one batch that also frees `headroom` extra slots, so a
//!   full cache is not trimmed one row per insert.
//! - **Age (TTL)** is only enforced when [`EmbeddingCache::cleanup_expired`]
//!   runs. The host is expected to call it on a schedule.
//!
//! Backend failures on the hot path (`lookup`, `insert`) are logged and
//! turned into cache misses so a degraded store never fails a request.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::EmbeddingMetrics;
use crate::now_millis;
use crate::store::{CacheBackend, CacheEntry, CacheSnapshot, MemoryBackend};
use crate::{Embedding, fingerprint};

/// Retention limits for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Maximum number of entries after any insert completes.
    pub max_entries: usize,

    /// Extra entries freed whenever eviction runs.
    pub headroom: usize,

    /// Maximum entry age.
    pub ttl: Duration,
}

impl EvictionPolicy {
    /// Number of entries to delete before inserting into a cache holding
    /// `count` entries. At least one slot is always freed once full.
    pub fn eviction_count(&self, count: usize) -> usize {
        if count < self.max_entries {
            return 0;
        }
        let headroom = self.headroom.clamp(1, self.max_entries.max(1));
        count - self.max_entries + headroom
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            headroom: 100,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Approximate stored size in bytes.
    pub total_size_bytes: u64,

    /// Models with cached embeddings, sorted.
    pub models: Vec<String>,

    /// Creation time of the oldest entry.
    pub oldest_created_at: Option<i64>,

    /// Most recent access across all entries.
    pub newest_accessed_at: Option<i64>,
}

/// Outcome of [`EmbeddingCache::import`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Cache for embeddings to avoid redundant provider calls.
pub struct EmbeddingCache {
    backend: Arc<dyn CacheBackend>,
    policy: EvictionPolicy,
    metrics: Arc<EmbeddingMetrics>,
    dimension: Option<usize>,

    /// Serializes evict-then-insert so concurrent inserts cannot overshoot
    /// `max_entries`. Lookups never take it.
    write_lock: Mutex<()>,
}

impl EmbeddingCache {
    /// Create a cache over `backend`, counting hits and misses into `metrics`.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        policy: EvictionPolicy,
        metrics: Arc<EmbeddingMetrics>,
    ) -> Self {
        Self {
            backend,
            policy: EvictionPolicy {
                max_entries: policy.max_entries.max(1),
                ..policy
            },
            metrics,
            dimension: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Create an in-memory cache with its own metrics.
    pub fn in_memory(policy: EvictionPolicy) -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            policy,
            Arc::new(EmbeddingMetrics::new()),
        )
    }

    /// Only serve and import vectors of length `dimension`. Stored entries
    /// of any other length are reported as misses.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// The retention policy in force.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up `key`, bumping its access stats on a hit.
    ///
    /// The hit or miss is counted in the same call. Backend errors and
    /// entries of the wrong dimension are logged and reported as a miss.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.backend.get_and_touch(key, now_millis()).await {
            Ok(Some(entry)) if self.dimension.is_some_and(|d| d != entry.vector.len()) => {
                self.metrics.record_miss();
                warn!(
                    "Ignoring cached embedding {key} with dimension {}",
                    entry.vector.len()
                );
                None
            }
            Ok(Some(entry)) => {
                self.metrics.record_hit();
                debug!("Cache hit for {key}");
                Some(entry)
            }
            Ok(None) => {
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                self.metrics.record_miss();
                warn!("Cache lookup failed on {} backend, treating as miss: {e}", self.backend.name());
                None
            }
        }
    }

    /// Look up the embedding for `text`.
    pub async fn get(&self, text: &str) -> Option<Embedding> {
        self.lookup(&fingerprint(text)).await.map(|e| e.vector)
    }

    /// Evict if needed, then replace-or-create the entry for `key`.
    pub async fn insert(
        &self,
        key: &str,
        vector: Embedding,
        model: &str,
        timestamp: i64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.evict_locked().await?;
        self.backend
            .upsert(CacheEntry::new(key, vector, model, timestamp))
            .await
    }

    /// Run LRU eviction if the cache is at or over capacity.
    ///
    /// Returns the number of entries removed.
    pub async fn evict_if_needed(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.evict_locked().await
    }

    async fn evict_locked(&self) -> Result<usize> {
        let count = self.backend.count().await?;
        let to_delete = self.policy.eviction_count(count);
        if to_delete == 0 {
            return Ok(0);
        }

        let removed = self.backend.delete_least_recent(to_delete).await?;
        info!(
            "Evicted {removed} least recently used embeddings ({count} entries, max {})",
            self.policy.max_entries
        );
        Ok(removed)
    }

    /// Delete entries created before `threshold` (epoch ms).
    pub async fn expire_older_than(&self, threshold: i64) -> Result<usize> {
        let removed = self.backend.delete_created_before(threshold).await?;
        if removed > 0 {
            info!("Expired {removed} embeddings created before {threshold}");
        }
        Ok(removed)
    }

    /// Delete entries older than the policy TTL as of `now`.
    pub async fn cleanup_expired(&self, now: i64) -> Result<usize> {
        let ttl_ms = i64::try_from(self.policy.ttl.as_millis()).unwrap_or(i64::MAX);
        self.expire_older_than(now.saturating_sub(ttl_ms)).await
    }

    /// Clear the entire cache.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await?;
        info!("Cleared embedding cache");
        Ok(())
    }

    /// Number of cached entries.
    pub async fn count(&self) -> Result<usize> {
        self.backend.count().await
    }

    /// Approximate stored size in bytes.
    pub async fn total_size_bytes(&self) -> Result<u64> {
        self.backend.total_size_bytes().await
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.backend.entries().await?;
        Ok(CacheStats {
            entries: entries.len(),
            max_entries: self.policy.max_entries,
            total_size_bytes: entries.iter().map(CacheEntry::size_bytes).sum(),
            models: entries
                .iter()
                .map(|e| e.model.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            oldest_created_at: entries.iter().map(|e| e.created_at).min(),
            newest_accessed_at: entries.iter().map(|e| e.last_accessed).max(),
        })
    }

    /// Dump every entry into a portable snapshot.
    pub async fn export(&self) -> Result<CacheSnapshot> {
        let entries = self.backend.entries().await?;
        Ok(CacheSnapshot::from_entries(&entries))
    }

    /// Merge a snapshot into the cache, replacing entries with the same key.
    ///
    /// Entries whose vector length does not match the cache dimension are
    /// skipped. Capacity is enforced as for regular inserts.
    pub async fn import(&self, snapshot: CacheSnapshot) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let _guard = self.write_lock.lock().await;

        for entry in snapshot.into_entries()? {
            if self.dimension.is_some_and(|d| d != entry.vector.len()) {
                warn!(
                    "Skipping imported embedding {} with dimension {}",
                    entry.key,
                    entry.vector.len()
                );
                summary.skipped += 1;
                continue;
            }
            self.evict_locked().await?;
            self.backend.upsert(entry).await?;
            summary.imported += 1;
        }

        info!(
            "Imported {} embeddings ({} skipped)",
            summary.imported, summary.skipped
        );
        Ok(summary)
    }

    /// Persist pending backend writes.
    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await
    }
}
