//! Tag reconciliation engine.
//!
//! Maps free-text candidate tags onto a small canonical vocabulary using
//! embedding similarity.
//!
//! # Architecture
//!
//! - `embeddings`: `EmbeddingProvider` trait with fastembed and OpenAI adapters
//! - `vocabulary`: per-batch ordered set of canonical tags and their vectors
//! - `matcher`: cosine similarity and nearest-tag lookup
//! - `reconciler`: batch admission policy and persistence

pub mod embeddings;
mod matcher;
mod reconciler;
mod vocabulary;

pub use embeddings::{EmbeddingError, EmbeddingModel, EmbeddingProvider, OpenAiEmbedder};
pub use matcher::{cosine_similarity, BestMatch, LinearMatcher, SimilarityMatcher};
pub use reconciler::{Decision, Outcome, ReconcileError, ReconciliationResult, TagReconciler};
pub use vocabulary::{CanonicalVocabulary, Tag};

/// Default similarity at or above which a candidate merges into an existing tag
pub const DEFAULT_THRESHOLD: f32 = 0.8;
