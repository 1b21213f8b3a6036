use crate::{
    reconcile::{EmbeddingError, ReconcileError},
    tags::TagStoreError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("tag store error: {0}")]
    Store(#[from] TagStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
