//! # Prism Embeddings
//!
//! Semantic embedding cache and provider-fallback pipeline for code search.
//!
//! ## Features
//!
//! - **Provider Chain**: primary and secondary semantic models with retry,
//!   backoff and per-attempt timeouts, ending in a deterministic fallback
//! - **Embedding Cache**: fingerprint-keyed store with LRU eviction and TTL
//!   expiry, in memory or persisted to disk
//! - **Similarity Search**: cosine similarity and stable top-K ranking
//! - **Metrics**: hit/miss/generation counters and a generation event log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       EmbeddingService                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  fingerprint ──► EmbeddingCache ──miss──► ProviderChain         │
//! │                       │                       │                 │
//! │                       ▼                       ▼                 │
//! │                 CacheBackend        OpenAI / HF / hash fallback │
//! │                (memory, file)                                   │
//! │                                                                 │
//! │              EmbeddingMetrics (shared by cache + chain)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod provider;
pub mod service;
pub mod similarity;
pub mod store;
pub mod vector;

pub use cache::{CacheStats, EmbeddingCache, EvictionPolicy, ImportSummary};
pub use chain::{ChainOutput, MAX_RATE_LIMIT_WAIT, ProviderChain, RetryPolicy};
pub use config::{CacheConfig, EmbeddingConfig, ProviderConfig, ProviderKind, RetryConfig};
pub use error::{EmbeddingError, Result};
pub use fingerprint::fingerprint;
pub use metrics::{EmbeddingMetrics, EventLog, GenerationEvent, MemoryEventLog, MetricsSnapshot};
pub use provider::{
    EmbeddingProvider, FALLBACK_MODEL, FALLBACK_PROVIDER, HashFallbackProvider,
    HuggingFaceProvider, OpenAIProvider,
};
pub use service::{
    BatchFailure, BatchResult, CACHE_PROVIDER, EmbeddingResult, EmbeddingService,
    EmbeddingServiceBuilder,
};
pub use similarity::{Candidate, SimilarityResult, cosine_similarity, find_similar};
pub use store::{CacheBackend, CacheEntry, CacheSnapshot, FileBackend, MemoryBackend};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings (all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSION: usize = 384;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
