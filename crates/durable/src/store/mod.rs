//! Store Interface (C2, §4.5): the capability-set contract every persistence
//! backend must satisfy, scoped by `transactionId`.
//!
//! A capability-set trait rather than inheritance (§9 Design Notes):
//! backends are chosen at startup and bound once behind `Arc<dyn EventStore>`
//! or a generic parameter.

mod memory;
mod postgres;

pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{TaskDefinition, TaskInstance, TaskStatus, Transaction, WorkflowDefinition, WorkflowInstance};

/// Errors raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("transaction already exists: {0}")]
    TransactionAlreadyExists(String),

    #[error("workflow instance not found: {0}")]
    WorkflowInstanceNotFound(Uuid),

    #[error("task instance not found: {0}")]
    TaskInstanceNotFound(Uuid),

    #[error("workflow definition not found: {0}/{1}")]
    WorkflowDefinitionNotFound(String, String),

    #[error("task definition not found: {0}")]
    TaskDefinitionNotFound(String),

    #[error("invalid transition on task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Scoped, transaction-keyed persistence for definitions and instances.
///
/// Implementations must be thread-safe and provide read-your-writes within a
/// single transaction-keyed partition; cross-partition consistency is not
/// required (§4.5).
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    // -- transactionInstance -------------------------------------------------
    async fn create_transaction(&self, transaction: Transaction) -> Result<(), StoreError>;
    async fn update_transaction(&self, transaction: Transaction) -> Result<(), StoreError>;
    async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, StoreError>;
    async fn delete_transaction(&self, transaction_id: &str) -> Result<(), StoreError>;

    // -- workflowInstance -----------------------------------------------------
    async fn create_workflow_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError>;
    async fn update_workflow_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError>;
    async fn get_workflow_instance(&self, workflow_id: Uuid) -> Result<WorkflowInstance, StoreError>;
    async fn get_workflow_instances_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;
    async fn delete_workflow_instance(&self, workflow_id: Uuid) -> Result<(), StoreError>;

    // -- taskInstance -----------------------------------------------------------
    async fn create_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError>;
    async fn update_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError>;

    /// Atomically replace the live instance for `task_reference_name` within
    /// `workflow_id`, preserving `retries` history and producing a new
    /// `task_id` (§4.5). A single slot per reference name; never a second
    /// concurrent row.
    async fn reload_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError>;

    async fn get_task_instance(&self, task_id: Uuid) -> Result<TaskInstance, StoreError>;
    async fn get_all_task_instances(&self, workflow_id: Uuid) -> Result<Vec<TaskInstance>, StoreError>;
    async fn delete_task_instance(&self, task_id: Uuid) -> Result<(), StoreError>;

    /// Find live task instances whose last heartbeat/start predates
    /// `stale_threshold` — grounded on the teacher's `reclaim_stale_tasks`,
    /// feeding synthetic `Timeout` updates back through the pipeline (§5,
    /// SPEC_FULL §11).
    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError>;

    // -- workflowDefinition -----------------------------------------------------
    async fn get_workflow_definition(&self, name: &str, rev: &str) -> Result<WorkflowDefinition, StoreError>;
    async fn list_workflow_definitions(&self, name: &str) -> Result<Vec<WorkflowDefinition>, StoreError>;
    async fn create_workflow_definition(&self, def: WorkflowDefinition) -> Result<(), StoreError>;
    async fn update_workflow_definition(&self, def: WorkflowDefinition) -> Result<(), StoreError>;

    // -- taskDefinition -----------------------------------------------------------
    async fn get_task_definition(&self, name: &str) -> Result<TaskDefinition, StoreError>;
    async fn list_task_definitions(&self) -> Result<Vec<TaskDefinition>, StoreError>;
    async fn create_task_definition(&self, def: TaskDefinition) -> Result<(), StoreError>;
    async fn update_task_definition(&self, def: TaskDefinition) -> Result<(), StoreError>;
}
