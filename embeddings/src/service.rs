//! Embedding service: cache lookup, provider chain, cache insert, metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, EmbeddingCache, EvictionPolicy, ImportSummary};
use crate::chain::{ProviderChain, RetryPolicy};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::metrics::{EmbeddingMetrics, EventLog, GenerationEvent, MemoryEventLog, MetricsSnapshot};
use crate::provider::{FALLBACK_MODEL, build_provider};
use crate::similarity::{self, Candidate, SimilarityResult};
use crate::store::{CacheBackend, CacheSnapshot, FileBackend, MemoryBackend};
use crate::{DEFAULT_DIMENSION, Embedding, fingerprint, now_millis};

/// Provider tag reported for vectors served from the cache.
pub const CACHE_PROVIDER: &str = "cache";

/// A generated or cached embedding.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingResult {
    pub vector: Embedding,

    /// Model that produced the vector.
    pub model: String,

    pub dimensions: usize,

    /// When the vector was generated (epoch ms).
    pub timestamp: i64,

    pub cache_hit: bool,

    /// Wall time spent serving this request.
    pub generation_time: Duration,

    /// Provider that produced the vector, or [`CACHE_PROVIDER`] on a hit.
    pub provider: String,

    /// True when the vector came from the hash fallback.
    pub degraded: bool,
}

/// A text that could not be embedded within a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    /// Position of the text in the input slice.
    pub index: usize,
    pub error: String,
}

/// Outcome of [`EmbeddingService::generate_batch_embeddings`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Successful results in input order. Failed texts are omitted.
    pub results: Vec<EmbeddingResult>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_time: Duration,

    /// `total_time` divided by the number of input texts.
    pub average_time: Duration,
    pub failures: Vec<BatchFailure>,
}

/// Cache-backed embedding generation with provider fallback.
pub struct EmbeddingService {
    chain: ProviderChain,
    cache: EmbeddingCache,
    metrics: Arc<EmbeddingMetrics>,
    events: Option<Arc<dyn EventLog>>,
    batch_size: usize,
    max_concurrency: usize,
}

impl EmbeddingService {
    /// Start building a service by hand.
    pub fn builder() -> EmbeddingServiceBuilder {
        EmbeddingServiceBuilder::default()
    }

    /// Build a service from validated configuration.
    ///
    /// Uses a [`FileBackend`] when `cache.path` is set and an in-memory
    /// backend otherwise.
    pub async fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let dimension = config.dimension;

        let backend: Arc<dyn CacheBackend> = match &config.cache.path {
            Some(path) => Arc::new(FileBackend::open(path).await?),
            None => Arc::new(MemoryBackend::new()),
        };

        let mut chain = ProviderChain::new(dimension, config.retry.retry_policy());
        if let Some(primary) = &config.primary {
            chain = chain.with_provider(build_provider(primary, config.model.as_deref(), dimension));
        }
        if let Some(secondary) = &config.secondary {
            chain = chain.with_provider(build_provider(secondary, None, dimension));
        }
        if config.fallback_enabled {
            chain = chain.with_fallback();
        }

        info!(
            "Embedding service using providers [{}] with {} cache",
            chain.provider_names().join(", "),
            backend.name()
        );

        Ok(Self::builder()
            .with_chain(chain)
            .with_backend(backend)
            .with_eviction_policy(config.cache.eviction_policy())
            .with_batch_size(config.batch_size)
            .with_max_concurrency(config.max_concurrency)
            .with_metrics_enabled(config.metrics_enabled)
            .build())
    }

    /// Vector length this service produces.
    pub fn dimension(&self) -> usize {
        self.chain.dimension()
    }

    /// The provider chain.
    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// The embedding cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Shared metrics collector.
    pub fn metrics(&self) -> Arc<EmbeddingMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Embed `text`, serving from cache when possible.
    ///
    /// Cache lookup precedes provider invocation, which precedes the cache
    /// insert, which precedes the metrics update. A failed cache insert is
    /// logged and does not fail the request.
    pub async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let key = fingerprint(text);

        if let Some(entry) = self.cache.lookup(&key).await {
            let generation_time = started.elapsed();
            let dimensions = entry.vector.len();
            self.log_event(GenerationEvent {
                timestamp: now_millis(),
                provider: CACHE_PROVIDER.to_string(),
                model: entry.model.clone(),
                generation_time_ms: generation_time.as_secs_f64() * 1000.0,
                cache_hit: true,
                dimension: dimensions,
                error: None,
                metadata: None,
            });
            return Ok(EmbeddingResult {
                degraded: entry.model == FALLBACK_MODEL,
                vector: entry.vector,
                model: entry.model,
                dimensions,
                timestamp: entry.created_at,
                cache_hit: true,
                generation_time,
                provider: CACHE_PROVIDER.to_string(),
            });
        }

        let output = match self.chain.generate(text).await {
            Ok(output) => output,
            Err(e) => {
                self.log_event(GenerationEvent {
                    timestamp: now_millis(),
                    provider: "none".to_string(),
                    model: String::new(),
                    generation_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    cache_hit: false,
                    dimension: 0,
                    error: Some(e.to_string()),
                    metadata: None,
                });
                return Err(e);
            }
        };

        let timestamp = now_millis();
        if let Err(e) = self
            .cache
            .insert(&key, output.embedding.clone(), &output.model, timestamp)
            .await
        {
            warn!("Failed to cache embedding from {}: {e}", output.provider);
        }

        let generation_time = started.elapsed();
        self.metrics
            .record_generation(&output.provider, generation_time);

        let dimensions = output.embedding.len();
        self.log_event(GenerationEvent {
            timestamp,
            provider: output.provider.clone(),
            model: output.model.clone(),
            generation_time_ms: generation_time.as_secs_f64() * 1000.0,
            cache_hit: false,
            dimension: dimensions,
            error: None,
            metadata: (output.failed_attempts > 0)
                .then(|| serde_json::json!({"failed_attempts": output.failed_attempts})),
        });

        Ok(EmbeddingResult {
            vector: output.embedding,
            model: output.model,
            dimensions,
            timestamp,
            cache_hit: false,
            generation_time,
            provider: output.provider,
            degraded: output.degraded,
        })
    }

    /// Embed many texts.
    ///
    /// Texts are processed in groups of `batch_size`, one group at a time,
    /// with at most `max_concurrency` requests in flight within a group. A
    /// failed text is counted and left out of `results`.
    pub async fn generate_batch_embeddings<S: AsRef<str>>(&self, texts: &[S]) -> BatchResult {
        let started = Instant::now();
        let in_flight = self.batch_size.min(self.max_concurrency).max(1);
        let mut results = Vec::with_capacity(texts.len());
        let mut failures = Vec::new();

        for (group_index, group) in texts.chunks(self.batch_size.max(1)).enumerate() {
            let offset = group_index * self.batch_size.max(1);
            debug!("Embedding batch group {group_index} ({} texts)", group.len());

            let outcomes: Vec<(usize, Result<EmbeddingResult>)> =
                stream::iter(group.iter().enumerate().map(|(i, text)| async move {
                    (offset + i, self.generate_embedding(text.as_ref()).await)
                }))
                .buffered(in_flight)
                .collect()
                .await;

            for (index, outcome) in outcomes {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!("Batch item {index} failed: {e}");
                        failures.push(BatchFailure {
                            index,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let total_time = started.elapsed();
        let average_time = u32::try_from(texts.len())
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| total_time / n);

        info!(
            "Batch embedded {} texts ({} failed) in {total_time:?}",
            results.len(),
            failures.len()
        );

        BatchResult {
            success_count: results.len(),
            failure_count: failures.len(),
            results,
            total_time,
            average_time,
            failures,
        }
    }

    /// Cosine similarity in `[0, 1]`.
    pub fn calculate_similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        similarity::cosine_similarity(a, b)
    }

    /// Rank `candidates` against `query`, best first.
    pub fn find_similar(
        &self,
        query: &[f32],
        candidates: &[Candidate],
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        similarity::find_similar(query, candidates, limit)
    }

    /// Delete entries older than the cache TTL. Returns how many were removed.
    pub async fn cleanup_expired_entries(&self) -> Result<usize> {
        self.cache.cleanup_expired(now_millis()).await
    }

    /// Remove every cached embedding.
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats().await
    }

    /// Current counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zero every counter.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        info!("Embedding metrics reset");
    }

    /// Dump the cache into a portable snapshot.
    pub async fn export_cache(&self) -> Result<CacheSnapshot> {
        self.cache.export().await
    }

    /// Merge a snapshot into the cache.
    pub async fn import_cache(&self, snapshot: CacheSnapshot) -> Result<ImportSummary> {
        self.cache.import(snapshot).await
    }

    /// Most recent generation events, oldest first. Empty when metrics
    /// logging is disabled.
    pub fn recent_events(&self, limit: usize) -> Vec<GenerationEvent> {
        self.events
            .as_ref()
            .map(|log| log.recent(limit))
            .unwrap_or_default()
    }

    /// Persist pending cache writes.
    pub async fn flush(&self) -> Result<()> {
        self.cache.flush().await
    }

    fn log_event(&self, event: GenerationEvent) {
        if let Some(log) = &self.events {
            log.append(event);
        }
    }
}

/// Builder for [`EmbeddingService`].
pub struct EmbeddingServiceBuilder {
    chain: Option<ProviderChain>,
    backend: Option<Arc<dyn CacheBackend>>,
    policy: EvictionPolicy,
    events: Option<Arc<dyn EventLog>>,
    metrics_enabled: bool,
    batch_size: usize,
    max_concurrency: usize,
}

impl Default for EmbeddingServiceBuilder {
    fn default() -> Self {
        Self {
            chain: None,
            backend: None,
            policy: EvictionPolicy::default(),
            events: None,
            metrics_enabled: true,
            batch_size: 10,
            max_concurrency: 5,
        }
    }
}

impl EmbeddingServiceBuilder {
    /// Use `chain` for generation. Defaults to the hash fallback alone.
    pub fn with_chain(mut self, chain: ProviderChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Store embeddings in `backend`. Defaults to memory.
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append generation events to `log` instead of a fresh in-memory one.
    pub fn with_event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.events = Some(log);
        self
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn build(self) -> EmbeddingService {
        let metrics = Arc::new(EmbeddingMetrics::new());
        let chain = self
            .chain
            .unwrap_or_else(|| {
                ProviderChain::new(DEFAULT_DIMENSION, RetryPolicy::default()).with_fallback()
            })
            .with_metrics(Arc::clone(&metrics));
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let cache = EmbeddingCache::new(backend, self.policy, Arc::clone(&metrics))
            .with_dimension(chain.dimension());

        let events = if self.metrics_enabled {
            Some(
                self.events
                    .unwrap_or_else(|| Arc::new(MemoryEventLog::default())),
            )
        } else {
            None
        };

        EmbeddingService {
            chain,
            cache,
            metrics,
            events,
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FALLBACK_PROVIDER;
    use pretty_assertions::assert_eq;

    fn fallback_service() -> EmbeddingService {
        let chain = ProviderChain::new(16, RetryPolicy::default()).with_fallback();
        EmbeddingService::builder().with_chain(chain).build()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let service = fallback_service();

        let first = service.generate_embedding("fn main() {}").await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.provider, FALLBACK_PROVIDER);
        assert!(first.degraded);
        assert_eq!(first.dimensions, 16);

        let second = service.generate_embedding("fn main() {}").await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.provider, CACHE_PROVIDER);
        assert!(second.degraded);
        assert_eq!(second.vector, first.vector);
        assert_eq!(second.timestamp, first.timestamp);

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.total_hits, 1);
        assert_eq!(snapshot.total_misses, 1);
        assert_eq!(snapshot.total_generated, 1);
        assert_eq!(snapshot.provider_usage.get(FALLBACK_PROVIDER), Some(&1));
        assert!((snapshot.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_events_logged_when_enabled() {
        let service = fallback_service();
        service.generate_embedding("a").await.unwrap();
        service.generate_embedding("a").await.unwrap();

        let events = service.recent_events(10);
        assert_eq!(events.len(), 2);
        assert!(!events[0].cache_hit);
        assert!(events[1].cache_hit);
        assert_eq!(events[1].provider, CACHE_PROVIDER);
    }

    #[tokio::test]
    async fn test_events_skipped_when_disabled() {
        let service = EmbeddingService::builder()
            .with_chain(ProviderChain::new(8, RetryPolicy::default()).with_fallback())
            .with_metrics_enabled(false)
            .build();
        service.generate_embedding("a").await.unwrap();

        assert!(service.recent_events(10).is_empty());
        // Counters are kept regardless.
        assert_eq!(service.metrics_snapshot().total_generated, 1);
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let service = fallback_service();
        service.generate_embedding("one").await.unwrap();
        service.generate_embedding("two").await.unwrap();

        let stats = service.cache_stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.models, vec![FALLBACK_MODEL.to_string()]);

        // Nothing is older than a week yet.
        assert_eq!(service.cleanup_expired_entries().await.unwrap(), 0);

        let snapshot = service.export_cache().await.unwrap();
        service.clear_cache().await.unwrap();
        assert_eq!(service.cache_stats().await.unwrap().entries, 0);

        let summary = service.import_cache(snapshot).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert!(service.generate_embedding("one").await.unwrap().cache_hit);

        service.reset_metrics();
        assert_eq!(service.metrics_snapshot(), MetricsSnapshot {
            last_updated: service.metrics_snapshot().last_updated,
            ..MetricsSnapshot::default()
        });
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let service = EmbeddingService::builder()
            .with_chain(ProviderChain::new(8, RetryPolicy::default()).with_fallback())
            .with_batch_size(2)
            .build();
        let texts = ["alpha", "beta", "gamma", "delta", "epsilon"];

        let batch = service.generate_batch_embeddings(&texts).await;
        assert_eq!(batch.success_count, 5);
        assert_eq!(batch.failure_count, 0);

        for (text, result) in texts.iter().zip(&batch.results) {
            let expected = service.generate_embedding(text).await.unwrap();
            assert_eq!(result.vector, expected.vector);
        }
    }

    #[tokio::test]
    async fn test_zero_capacity_policy_still_bounds_cache() {
        let service = EmbeddingService::builder()
            .with_chain(ProviderChain::new(8, RetryPolicy::default()).with_fallback())
            .with_eviction_policy(EvictionPolicy {
                max_entries: 0,
                headroom: 0,
                ..EvictionPolicy::default()
            })
            .build();

        service.generate_embedding("one").await.unwrap();
        service.generate_embedding("two").await.unwrap();
        assert_eq!(service.cache().policy().max_entries, 1);
        assert_eq!(service.cache_stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let service = fallback_service();
        let texts: [&str; 0] = [];
        let batch = service.generate_batch_embeddings(&texts).await;
        assert_eq!(batch.success_count, 0);
        assert_eq!(batch.average_time, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_from_config_in_memory() {
        let service = EmbeddingService::from_config(&EmbeddingConfig::default())
            .await
            .unwrap();
        assert_eq!(service.dimension(), DEFAULT_DIMENSION);
        assert_eq!(service.chain().provider_names(), vec![FALLBACK_PROVIDER]);
    }
}
