//! Batch reconciliation of candidate tags against the canonical vocabulary.
//!
//! For every candidate, in input order:
//! - an exact (case-sensitive) name match is accepted as-is
//! - otherwise the nearest tag of the working vocabulary is looked up; a score
//!   at or above the threshold merges the candidate into that tag
//! - anything else is admitted as a new canonical tag and joins the working
//!   vocabulary immediately, so later candidates in the same batch resolve
//!   against it
//!
//! Admitted tags are written to the store in one bulk insert after every
//! decision is final. Any provider or store failure aborts the whole batch.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::tags::{TagStore, TagStoreError};

use super::embeddings::{EmbeddingError, EmbeddingProvider};
use super::matcher::{LinearMatcher, SimilarityMatcher};
use super::vocabulary::{CanonicalVocabulary, Tag};
use super::DEFAULT_THRESHOLD;

/// Errors that abort a reconciliation batch.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("embedding unavailable for {text:?}: {source}")]
    EmbeddingUnavailable {
        text: String,
        #[source]
        source: EmbeddingError,
    },

    #[error("tag vocabulary unavailable: {0}")]
    VocabularyUnavailable(#[source] TagStoreError),

    #[error("failed to persist admitted tags: {0}")]
    Persistence(#[source] TagStoreError),
}

/// How a single candidate was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Already a canonical name.
    Exact,
    /// Similar enough to an existing tag to reuse it.
    Merged { into: String, score: f32 },
    /// Admitted as a new canonical tag.
    Admitted { nearest: Option<String>, score: f32 },
    /// Admitted here, but another writer stored the same name first.
    ConcurrentlyAdmitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub candidate: String,
    pub tag: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Canonical names to attach, duplicates collapsed, in first-seen order.
    pub tags: Vec<String>,
    /// Names this batch actually added to the store.
    pub inserted: Vec<String>,
    /// One entry per non-blank candidate, in input order.
    pub decisions: Vec<Decision>,
}

impl ReconciliationResult {
    fn resolve(&mut self, seen: &mut HashSet<String>, decision: Decision) {
        if seen.insert(decision.tag.clone()) {
            self.tags.push(decision.tag.clone());
        }
        self.decisions.push(decision);
    }
}

pub struct TagReconciler {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn TagStore>,
    matcher: Box<dyn SimilarityMatcher>,
    threshold: f32,
    /// Dedicated pool for embedding calls; `None` uses rayon's global pool.
    pool: Option<rayon::ThreadPool>,
}

impl TagReconciler {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn TagStore>) -> Self {
        Self {
            embedder,
            store,
            matcher: Box::new(LinearMatcher),
            threshold: DEFAULT_THRESHOLD,
            pool: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_matcher(mut self, matcher: Box<dyn SimilarityMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Limit the number of concurrent embedding calls.
    pub fn with_parallelism(
        mut self,
        threads: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        self.pool = Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|idx| format!("rentag-embed-{idx}"))
                .build()?,
        );
        Ok(self)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn reconcile(&self, candidates: &[String]) -> Result<ReconciliationResult, ReconcileError> {
        let candidates: Vec<&str> = candidates
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();

        let mut result = ReconciliationResult::default();
        if candidates.is_empty() {
            return Ok(result);
        }

        let existing = self
            .store
            .list_names()
            .map_err(ReconcileError::VocabularyUnavailable)?;
        let existing_set: HashSet<&str> = existing.iter().map(String::as_str).collect();

        // distinct candidates that need a similarity decision
        let mut pending: Vec<&str> = vec![];
        let mut pending_set: HashSet<&str> = HashSet::new();
        for &candidate in &candidates {
            if !existing_set.contains(candidate) && pending_set.insert(candidate) {
                pending.push(candidate);
            }
        }

        let mut vocabulary = CanonicalVocabulary::with_capacity(existing.len() + pending.len());
        let mut candidate_vectors: HashMap<&str, Vec<f32>> = HashMap::new();

        if pending.is_empty() {
            // every candidate is an exact match, no vectors needed
            for name in &existing {
                vocabulary.insert(Tag::new(name.clone(), vec![]));
            }
        } else {
            // one embedding per vocabulary tag and per distinct candidate,
            // computed once for the whole batch
            let texts: Vec<&str> = existing
                .iter()
                .map(String::as_str)
                .chain(pending.iter().copied())
                .collect();
            let mut vectors = self.embed_all(&texts)?.into_iter();

            for (name, vector) in existing.iter().zip(vectors.by_ref()) {
                if !vocabulary.insert(Tag::new(name.clone(), vector)) {
                    log::warn!("ignoring duplicate or empty stored tag {name:?}");
                }
            }
            candidate_vectors.extend(pending.iter().copied().zip(vectors));
        }

        let mut seen = HashSet::new();
        let mut admitted: Vec<String> = vec![];

        for candidate in candidates {
            if vocabulary.contains(candidate) {
                result.resolve(
                    &mut seen,
                    Decision {
                        candidate: candidate.to_string(),
                        tag: candidate.to_string(),
                        outcome: Outcome::Exact,
                    },
                );
                continue;
            }

            let Some(vector) = candidate_vectors.get(candidate) else {
                log::error!("no embedding computed for candidate {candidate:?}");
                return Err(ReconcileError::EmbeddingUnavailable {
                    text: candidate.to_string(),
                    source: EmbeddingError::Malformed("no embedding computed".to_string()),
                });
            };

            let best = self.matcher.best_match(vector, &vocabulary);
            log::debug!(
                "candidate {candidate:?}: nearest {:?} with similarity {:.4}",
                best.name(),
                best.score
            );

            let decision = match best.name() {
                Some(name) if best.score >= self.threshold => Decision {
                    candidate: candidate.to_string(),
                    tag: name.to_string(),
                    outcome: Outcome::Merged {
                        into: name.to_string(),
                        score: best.score,
                    },
                },
                nearest => {
                    let decision = Decision {
                        candidate: candidate.to_string(),
                        tag: candidate.to_string(),
                        outcome: Outcome::Admitted {
                            nearest: nearest.map(str::to_string),
                            score: best.score,
                        },
                    };
                    vocabulary.insert(Tag::new(candidate, vector.clone()));
                    admitted.push(candidate.to_string());
                    decision
                }
            };

            result.resolve(&mut seen, decision);
        }

        if !admitted.is_empty() {
            result.inserted = self
                .store
                .bulk_insert(&admitted)
                .map_err(ReconcileError::Persistence)?;

            let inserted: HashSet<&str> = result.inserted.iter().map(String::as_str).collect();
            for decision in result.decisions.iter_mut() {
                if matches!(decision.outcome, Outcome::Admitted { .. })
                    && !inserted.contains(decision.tag.as_str())
                {
                    log::warn!(
                        "tag {:?} was admitted concurrently by another writer",
                        decision.tag
                    );
                    decision.outcome = Outcome::ConcurrentlyAdmitted;
                }
            }
        }

        log::info!(
            "reconciled {} candidates into {} tags ({} new)",
            result.decisions.len(),
            result.tags.len(),
            result.inserted.len()
        );

        Ok(result)
    }

    /// Embeds every text in one provider batch, failing on the first
    /// unusable vector. Output order matches input order.
    fn embed_all(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ReconcileError> {
        let batch = match &self.pool {
            Some(pool) => pool.install(|| self.embedder.embed_batch(texts)),
            None => self.embedder.embed_batch(texts),
        };

        let vectors = batch.map_err(|err| match err {
            EmbeddingError::Text { text, source } => ReconcileError::EmbeddingUnavailable {
                text,
                source: *source,
            },
            source => ReconcileError::EmbeddingUnavailable {
                text: format!("batch of {} texts", texts.len()),
                source,
            },
        })?;

        if vectors.len() != texts.len() {
            return Err(ReconcileError::EmbeddingUnavailable {
                text: format!("batch of {} texts", texts.len()),
                source: EmbeddingError::Malformed(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    vectors.len()
                )),
            });
        }

        for (text, vector) in texts.iter().zip(vectors.iter()) {
            check_vector(vector).map_err(|source| ReconcileError::EmbeddingUnavailable {
                text: text.to_string(),
                source,
            })?;
        }

        if let Some(first) = vectors.first() {
            let dimensions = first.len();
            if let Some((text, vector)) = texts
                .iter()
                .zip(vectors.iter())
                .find(|(_, v)| v.len() != dimensions)
            {
                return Err(ReconcileError::EmbeddingUnavailable {
                    text: text.to_string(),
                    source: EmbeddingError::Malformed(format!(
                        "dimension mismatch: expected {dimensions}, got {}",
                        vector.len()
                    )),
                });
            }
        }

        Ok(vectors)
    }
}

fn check_vector(vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::Malformed("empty vector".to_string()));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingError::Malformed("non-finite component".to_string()));
    }
    Ok(())
}
