//! Error types for the baking engine

use crate::model::{DivisionId, LayerId};
use thiserror::Error;

/// Errors reported by an entity/division/layer store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store deadline exceeded")]
    DeadlineExceeded,

    #[error("Store quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Transient failures are retried by rescheduling; everything else is
    /// structural.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::DeadlineExceeded | StoreError::QuotaExceeded(_)
        )
    }
}

/// Errors reported by a job queue
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Queue closed")]
    Closed,
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

/// Document generation errors
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Division {0} has not finished baking")]
    DivisionNotBaked(DivisionId),

    #[error("Auto-managed layer {0} has not been baked yet")]
    LayerNotBaked(LayerId),

    #[error("Layer {0} has no root division")]
    MissingRoot(LayerId),

    #[error("Layer {0} is not auto-managed")]
    NotAutoManaged(LayerId),

    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl DocumentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DocumentError::Store(e) if e.is_transient())
    }
}

/// Settings validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Division size must be at least 1")]
    ZeroDivisionSize,

    #[error("Division growth limit must be a finite, non-negative number (got {0})")]
    InvalidGrowthLimit(f64),

    #[error("Setup page size must be at least 1")]
    ZeroPageSize,

    #[error("Task budget must be greater than zero")]
    ZeroTaskBudget,
}

/// Errors surfaced by the bake scheduler
#[derive(Debug, Error)]
pub enum BakeError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid stage parameters: {0}")]
    InvalidParams(String),

    #[error("Layer {0} not found")]
    LayerNotFound(LayerId),

    #[error("Task deadline exceeded")]
    DeadlineExceeded,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

impl BakeError {
    /// Whether rescheduling the same (or a checkpointed) task can recover.
    pub fn is_transient(&self) -> bool {
        match self {
            BakeError::DeadlineExceeded => true,
            BakeError::Store(e) => e.is_transient(),
            BakeError::Queue(e) => e.is_transient(),
            BakeError::Document(e) => e.is_transient(),
            BakeError::InvalidState(_)
            | BakeError::InvalidParams(_)
            | BakeError::LayerNotFound(_) => false,
        }
    }
}

// Result type aliases for convenience
pub type BakeResult<T> = Result<T, BakeError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type QueueResult<T> = Result<T, QueueError>;
pub type DocumentResult<T> = Result<T, DocumentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::DeadlineExceeded.is_transient());
        assert!(StoreError::QuotaExceeded("writes".into()).is_transient());
        assert!(!StoreError::Conflict("box".into()).is_transient());
        assert!(!StoreError::NotFound("division".into()).is_transient());
        assert!(!StoreError::Corrupt("entity".into()).is_transient());
    }

    #[test]
    fn test_bake_error_classification() {
        assert!(BakeError::DeadlineExceeded.is_transient());
        assert!(BakeError::from(StoreError::DeadlineExceeded).is_transient());
        assert!(BakeError::from(QueueError::Unavailable("busy".into())).is_transient());
        assert!(!BakeError::from(QueueError::Closed).is_transient());
        assert!(!BakeError::InvalidState("nope".into()).is_transient());
        assert!(!BakeError::from(StoreError::Corrupt("x".into())).is_transient());
        assert!(BakeError::from(DocumentError::Store(StoreError::Unavailable("x".into())))
            .is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = BakeError::InvalidState("Only auto-managed layers can be baked".into());
        assert_eq!(
            err.to_string(),
            "Invalid state: Only auto-managed layers can be baked"
        );
        assert_eq!(StoreError::DeadlineExceeded.to_string(), "Store deadline exceeded");
    }
}
