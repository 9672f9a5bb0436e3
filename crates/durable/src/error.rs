//! Crate-wide error type returned from the public engine API.
//!
//! Per-module errors ([`ValidationError`](crate::validation::ValidationError),
//! [`StoreError`](crate::store::StoreError)) stay where they're raised;
//! `EngineError` only wraps them at the boundary the engine exposes to
//! callers, following the teacher's `ExecutorError` (one error enum per
//! public-facing component, `#[from]` conversions from the layers under it).

use uuid::Uuid;

use crate::model::TaskStatus;
use crate::store::StoreError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow definition is invalid: {0:?}")]
    InvalidDefinition(Vec<ValidationError>),

    #[error("transaction already exists: {0}")]
    TransactionAlreadyExists(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("invalid status transition on task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("unresolved reference: {0}")]
    UnknownReference(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
