//! Reconciliation task contract.

use async_trait::async_trait;
use serde_json::Value;

use lessonsync_core::error::AppError;

/// A periodic sweep that brings derived state back in line with its source.
#[async_trait]
pub trait ReconcileTask: Send + Sync + std::fmt::Debug {
    /// Task name used in logs.
    fn name(&self) -> &str;

    /// Run one sweep and return a summary of what it did.
    async fn run_once(&self) -> Result<Value, TaskError>;
}

/// Error from a reconciliation sweep
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Permanent failure, the sweep cannot succeed as configured
    #[error("Permanent task failure: {0}")]
    Permanent(String),

    /// Transient failure, the next sweep may succeed
    #[error("Transient task failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl TaskError {
    /// Whether the next scheduled sweep is expected to fix this.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Permanent(_) => false,
            Self::Internal(e) => e.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_keep_transience() {
        assert!(TaskError::from(AppError::store("down")).is_transient());
        assert!(!TaskError::from(AppError::validation("bad")).is_transient());
        assert!(TaskError::Transient("x".into()).is_transient());
        assert!(!TaskError::Permanent("x".into()).is_transient());
    }
}
