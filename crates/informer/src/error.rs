//! Informer errors

use thiserror::Error;

/// Errors that end an informer run
#[derive(Debug, Error)]
pub enum InformerError {
    /// The initial listing could not be applied to the cache
    #[error("Initial cache sync failed: {0}")]
    SyncFailed(String),

    /// Shutdown was requested before the initial listing completed
    #[error("Shutdown requested before initial cache sync")]
    SyncCancelled,

    /// A background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),
}

impl InformerError {
    /// Whether this error is the intentional shutdown path rather than a defect
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::SyncCancelled)
    }
}
