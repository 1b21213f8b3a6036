//! Nearest canonical tag lookup by cosine similarity.

use super::vocabulary::{CanonicalVocabulary, Tag};

/// Best-scoring canonical tag for a query vector.
#[derive(Debug, Clone, Copy)]
pub struct BestMatch<'v> {
    pub tag: Option<&'v Tag>,
    pub score: f32,
}

impl<'v> BestMatch<'v> {
    pub fn none() -> Self {
        Self {
            tag: None,
            score: 0.0,
        }
    }

    pub fn name(&self) -> Option<&'v str> {
        self.tag.map(|t| t.name.as_str())
    }
}

/// Finds the canonical tag most similar to a query embedding.
///
/// This is the seam where a vector index could replace the linear scan
/// without touching the reconciler.
pub trait SimilarityMatcher: Send + Sync {
    fn best_match<'v>(&self, query: &[f32], vocabulary: &'v CanonicalVocabulary)
        -> BestMatch<'v>;
}

/// Scans every vocabulary entry.
///
/// Returns `(None, 0.0)` for an empty vocabulary, otherwise the entry with the
/// strictly highest score; on ties the entry inserted first wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearMatcher;

impl SimilarityMatcher for LinearMatcher {
    fn best_match<'v>(
        &self,
        query: &[f32],
        vocabulary: &'v CanonicalVocabulary,
    ) -> BestMatch<'v> {
        let query_norm = l2_norm(query);

        let mut best = BestMatch::none();
        for tag in vocabulary.iter() {
            let score = cosine_with_norm(query, query_norm, &tag.embedding);
            if best.tag.is_none() || score > best.score {
                best = BestMatch {
                    tag: Some(tag),
                    score,
                };
            }
        }

        best
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// `dot(a, b) / (|a| * |b|)`; 0.0 for mismatched lengths or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norm(a, l2_norm(a), b)
}

fn cosine_with_norm(query: &[f32], query_norm: f32, target: &[f32]) -> f32 {
    if query.len() != target.len() || query_norm < f32::EPSILON {
        return 0.0;
    }

    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}
