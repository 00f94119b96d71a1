//! Controller-specific error types.
//!
//! This module defines the errors the deployment watcher binary can exit
//! with. Informer and Kubernetes errors are wrapped as-is.

use informer::InformerError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the deployment watcher.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Informer run failed
    #[error("Informer error: {0}")]
    Informer(#[from] InformerError),
}
