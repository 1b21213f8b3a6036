use std::sync::Arc;

use crate::{
    reconcile::{cosine_similarity, EmbeddingProvider, ReconciliationResult, TagReconciler},
    tags::{StoredTag, TagStore},
};

use super::{backend::AppBackend, errors::AppError};

/// Runs the reconciliation engine in-process against a local tag store.
pub struct AppLocal {
    reconciler: TagReconciler,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn TagStore>,
}

impl AppLocal {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn TagStore>,
        threshold: f32,
        parallelism: Option<usize>,
    ) -> Result<Self, AppError> {
        let mut reconciler =
            TagReconciler::new(embedder.clone(), store.clone()).with_threshold(threshold);

        if let Some(threads) = parallelism {
            reconciler = reconciler
                .with_parallelism(threads)
                .map_err(|err| anyhow::anyhow!("failed to build embedding pool: {err}"))?;
        }

        Ok(AppLocal {
            reconciler,
            embedder,
            store,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.reconciler.threshold()
    }

    /// Cosine similarity of two strings under the configured provider.
    pub fn similarity(&self, a: &str, b: &str) -> Result<f32, AppError> {
        let a = self.embedder.embed(a)?;
        let b = self.embedder.embed(b)?;
        Ok(cosine_similarity(&a, &b))
    }
}

impl AppBackend for AppLocal {
    fn reconcile(&self, candidates: Vec<String>) -> Result<ReconciliationResult, AppError> {
        Ok(self.reconciler.reconcile(&candidates)?)
    }

    fn tags(&self) -> Result<Vec<StoredTag>, AppError> {
        Ok(self.store.list()?)
    }
}
