//! Usage metrics for the embedding pipeline.
//!
//! `EmbeddingMetrics` is an explicitly constructed collector owned by an
//! `EmbeddingService` and shared (via `Arc`) with its cache. Each counter is
//! updated atomically on its own; a snapshot taken while requests are in
//! flight may show totals and per-provider breakdowns that briefly disagree.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::now_millis;

/// Running mean over generation times.
#[derive(Debug, Default)]
struct RunningAverage {
    samples: u64,
    mean_ms: f64,
}

impl RunningAverage {
    fn push(&mut self, value_ms: f64) {
        self.samples += 1;
        self.mean_ms += (value_ms - self.mean_ms) / self.samples as f64;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding a counter lock cannot leave a counter half-written.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters for embedding generation and cache traffic.
#[derive(Debug, Default)]
pub struct EmbeddingMetrics {
    total_generated: AtomicU64,
    total_hits: AtomicU64,
    total_misses: AtomicU64,
    generation_time: Mutex<RunningAverage>,
    provider_usage: Mutex<HashMap<String, u64>>,
    error_counts: Mutex<HashMap<String, u64>>,
    last_updated: AtomicU64,
}

impl EmbeddingMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&self) {
        self.last_updated
            .store(now_millis().max(0) as u64, Ordering::Relaxed);
    }

    /// Count a cache hit.
    pub fn record_hit(&self) {
        self.total_hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Count a cache miss.
    pub fn record_miss(&self) {
        self.total_misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Count a freshly generated embedding.
    pub fn record_generation(&self, provider: &str, elapsed: Duration) {
        self.total_generated.fetch_add(1, Ordering::Relaxed);
        lock(&self.generation_time).push(elapsed.as_secs_f64() * 1000.0);
        *lock(&self.provider_usage)
            .entry(provider.to_string())
            .or_insert(0) += 1;
        self.touch();
    }

    /// Count a failed attempt against a provider.
    pub fn record_error(&self, provider: &str) {
        *lock(&self.error_counts)
            .entry(provider.to_string())
            .or_insert(0) += 1;
        self.touch();
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_generated: self.total_generated.load(Ordering::Relaxed),
            total_hits: self.total_hits.load(Ordering::Relaxed),
            total_misses: self.total_misses.load(Ordering::Relaxed),
            average_generation_time_ms: lock(&self.generation_time).mean_ms,
            last_updated: self.last_updated.load(Ordering::Relaxed) as i64,
            provider_usage: lock(&self.provider_usage).clone(),
            error_counts: lock(&self.error_counts).clone(),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.total_generated.store(0, Ordering::Relaxed);
        self.total_hits.store(0, Ordering::Relaxed);
        self.total_misses.store(0, Ordering::Relaxed);
        *lock(&self.generation_time) = RunningAverage::default();
        lock(&self.provider_usage).clear();
        lock(&self.error_counts).clear();
        self.touch();
    }
}

/// Point-in-time copy of [`EmbeddingMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_generated: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub average_generation_time_ms: f64,
    pub last_updated: i64,
    pub provider_usage: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Fraction of lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits as f64 / total as f64
        }
    }

    /// Fraction of generated embeddings that came from `provider`.
    pub fn usage_share(&self, provider: &str) -> f64 {
        if self.total_generated == 0 {
            return 0.0;
        }
        let used = self.provider_usage.get(provider).copied().unwrap_or(0);
        used as f64 / self.total_generated as f64
    }
}

/// One generation or cache-hit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub timestamp: i64,
    pub provider: String,
    pub model: String,
    pub generation_time_ms: f64,
    pub cache_hit: bool,
    pub dimension: usize,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Append-only sink for generation events.
pub trait EventLog: Send + Sync {
    /// Append one event.
    fn append(&self, event: GenerationEvent);

    /// Most recent events, oldest first.
    fn recent(&self, limit: usize) -> Vec<GenerationEvent>;
}

/// Bounded in-memory event log that drops the oldest rows when full.
#[derive(Debug)]
pub struct MemoryEventLog {
    events: Mutex<VecDeque<GenerationEvent>>,
    capacity: usize,
}

impl MemoryEventLog {
    /// Create a log holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, event: GenerationEvent) {
        let mut events = lock(&self.events);
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn recent(&self, limit: usize) -> Vec<GenerationEvent> {
        let events = lock(&self.events);
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }
}
