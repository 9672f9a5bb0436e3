//! In-memory reference implementation of [`EventStore`].
//!
//! Grounded on the teacher's `persistence/memory.rs` (`InMemoryWorkflowEventStore`):
//! sharded `RwLock<HashMap<...>>` state guarded by `parking_lot`. Row shapes
//! are replaced (`Transaction`/`WorkflowInstance`/`TaskInstance` instead of
//! the teacher's flat `Workflow`/`Task` rows) and `reload` is added — the
//! teacher always creates a new task row on retry; this store instead
//! replaces the live slot for a `taskReferenceName` in place, matching
//! invariant 3 (§3).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{TaskDefinition, TaskInstance, Transaction, WorkflowDefinition, WorkflowInstance};

use super::{EventStore, StoreError};

/// Primarily for tests and single-process deployments. Provides the same
/// contract a real backend (e.g. [`super::PostgresEventStore`]) would need to
/// satisfy.
#[derive(Default)]
pub struct InMemoryEventStore {
    transactions: RwLock<HashMap<String, Transaction>>,
    workflow_instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    task_instances: RwLock<HashMap<Uuid, TaskInstance>>,
    /// `(workflow_id, taskReferenceName) -> task_id`, the single live slot
    /// `reload` replaces.
    task_ref_index: RwLock<HashMap<(Uuid, String), Uuid>>,
    workflow_definitions: RwLock<HashMap<(String, String), WorkflowDefinition>>,
    task_definitions: RwLock<HashMap<String, TaskDefinition>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions currently tracked (for test assertions).
    pub fn transaction_count(&self) -> usize {
        self.transactions.read().len()
    }

    /// Number of task instances currently live for a workflow (for test
    /// assertions about invariant 3: at most one live row per reference
    /// name).
    pub fn task_instance_count(&self, workflow_id: Uuid) -> usize {
        self.task_instances
            .read()
            .values()
            .filter(|t| t.workflow_id == workflow_id)
            .count()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        let mut txs = self.transactions.write();
        if txs.contains_key(&transaction.transaction_id) {
            return Err(StoreError::TransactionAlreadyExists(transaction.transaction_id));
        }
        txs.insert(transaction.transaction_id.clone(), transaction);
        Ok(())
    }

    async fn update_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        let mut txs = self.transactions.write();
        if !txs.contains_key(&transaction.transaction_id) {
            return Err(StoreError::TransactionNotFound(transaction.transaction_id));
        }
        txs.insert(transaction.transaction_id.clone(), transaction);
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, StoreError> {
        self.transactions
            .read()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.to_string()))
    }

    async fn delete_transaction(&self, transaction_id: &str) -> Result<(), StoreError> {
        self.transactions.write().remove(transaction_id);
        Ok(())
    }

    async fn create_workflow_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        self.workflow_instances.write().insert(instance.workflow_id, instance);
        Ok(())
    }

    async fn update_workflow_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        let mut instances = self.workflow_instances.write();
        if !instances.contains_key(&instance.workflow_id) {
            return Err(StoreError::WorkflowInstanceNotFound(instance.workflow_id));
        }
        instances.insert(instance.workflow_id, instance);
        Ok(())
    }

    async fn get_workflow_instance(&self, workflow_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.workflow_instances
            .read()
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::WorkflowInstanceNotFound(workflow_id))
    }

    async fn get_workflow_instances_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        Ok(self
            .workflow_instances
            .read()
            .values()
            .filter(|w| w.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn delete_workflow_instance(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        self.workflow_instances.write().remove(&workflow_id);
        Ok(())
    }

    async fn create_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError> {
        let key = (instance.workflow_id, instance.task_reference_name.clone());
        self.task_ref_index.write().insert(key, instance.task_id);
        self.task_instances.write().insert(instance.task_id, instance);
        Ok(())
    }

    async fn update_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError> {
        let mut tasks = self.task_instances.write();
        let current = tasks
            .get(&instance.task_id)
            .ok_or(StoreError::TaskInstanceNotFound(instance.task_id))?;

        if current.status != instance.status && !current.status.can_transition_to(instance.status) {
            return Err(StoreError::InvalidTransition {
                task_id: instance.task_id,
                from: current.status,
                to: instance.status,
            });
        }

        tasks.insert(instance.task_id, instance);
        Ok(())
    }

    async fn reload_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError> {
        let key = (instance.workflow_id, instance.task_reference_name.clone());
        let mut index = self.task_ref_index.write();
        let mut tasks = self.task_instances.write();

        if let Some(old_task_id) = index.get(&key) {
            tasks.remove(old_task_id);
        }

        index.insert(key, instance.task_id);
        tasks.insert(instance.task_id, instance);
        Ok(())
    }

    async fn get_task_instance(&self, task_id: Uuid) -> Result<TaskInstance, StoreError> {
        self.task_instances
            .read()
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskInstanceNotFound(task_id))
    }

    async fn get_all_task_instances(&self, workflow_id: Uuid) -> Result<Vec<TaskInstance>, StoreError> {
        Ok(self
            .task_instances
            .read()
            .values()
            .filter(|t| t.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn delete_task_instance(&self, task_id: Uuid) -> Result<(), StoreError> {
        let mut tasks = self.task_instances.write();
        if let Some(task) = tasks.remove(&task_id) {
            self.task_ref_index
                .write()
                .remove(&(task.workflow_id, task.task_reference_name));
        }
        Ok(())
    }

    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError> {
        let now = Utc::now();
        let stale = self
            .task_instances
            .read()
            .values()
            .filter(|t| t.status.is_live())
            .filter(|t| {
                now.signed_duration_since(t.start_time)
                    .to_std()
                    .map(|elapsed| elapsed > stale_threshold)
                    .unwrap_or(false)
            })
            .map(|t| t.task_id)
            .collect();
        Ok(stale)
    }

    async fn get_workflow_definition(&self, name: &str, rev: &str) -> Result<WorkflowDefinition, StoreError> {
        self.workflow_definitions
            .read()
            .get(&(name.to_string(), rev.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::WorkflowDefinitionNotFound(name.to_string(), rev.to_string()))
    }

    async fn list_workflow_definitions(&self, name: &str) -> Result<Vec<WorkflowDefinition>, StoreError> {
        Ok(self
            .workflow_definitions
            .read()
            .values()
            .filter(|d| d.name == name)
            .cloned()
            .collect())
    }

    async fn create_workflow_definition(&self, def: WorkflowDefinition) -> Result<(), StoreError> {
        self.workflow_definitions
            .write()
            .insert((def.name.clone(), def.rev.clone()), def);
        Ok(())
    }

    async fn update_workflow_definition(&self, def: WorkflowDefinition) -> Result<(), StoreError> {
        let key = (def.name.clone(), def.rev.clone());
        let mut defs = self.workflow_definitions.write();
        if !defs.contains_key(&key) {
            return Err(StoreError::WorkflowDefinitionNotFound(def.name, def.rev));
        }
        defs.insert(key, def);
        Ok(())
    }

    async fn get_task_definition(&self, name: &str) -> Result<TaskDefinition, StoreError> {
        self.task_definitions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::TaskDefinitionNotFound(name.to_string()))
    }

    async fn list_task_definitions(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        Ok(self.task_definitions.read().values().cloned().collect())
    }

    async fn create_task_definition(&self, def: TaskDefinition) -> Result<(), StoreError> {
        self.task_definitions.write().insert(def.name.clone(), def);
        Ok(())
    }

    async fn update_task_definition(&self, def: TaskDefinition) -> Result<(), StoreError> {
        let mut defs = self.task_definitions.write();
        if !defs.contains_key(&def.name) {
            return Err(StoreError::TaskDefinitionNotFound(def.name));
        }
        defs.insert(def.name.clone(), def);
        Ok(())
    }
}
