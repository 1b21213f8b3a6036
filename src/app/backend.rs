use crate::{reconcile::ReconciliationResult, tags::StoredTag};

use super::errors::AppError;

/// Operations available to the CLI, served either in-process or by a daemon.
pub trait AppBackend: Send + Sync {
    fn reconcile(&self, candidates: Vec<String>) -> Result<ReconciliationResult, AppError>;
    fn tags(&self) -> Result<Vec<StoredTag>, AppError>;
}
