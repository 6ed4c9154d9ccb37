//! Error type for the hypervisor abstraction layer.

use thiserror::Error;

/// Every hypervisor and notifier fault collapses to this single kind: a
/// caller-supplied context string plus the backend's own diagnostic.
#[derive(Error, Debug)]
#[error("{context}: {detail}")]
pub struct BackendFailure {
    pub context: String,
    pub detail: String,
}

impl BackendFailure {
    pub fn new(context: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self {
            context: context.into(),
            detail: detail.to_string(),
        }
    }
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, BackendFailure>;
