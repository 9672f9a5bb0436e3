//! PostgreSQL implementation of [`EventStore`].
//!
//! Grounded on the teacher's `persistence/postgres.rs` (`SELECT ... FOR
//! UPDATE SKIP LOCKED`, `#[instrument]`-wrapped queries mapping to
//! `StoreError::Database`), generalized from the teacher's two-tier
//! Workflow/Activity row shapes to this crate's three-tier
//! Transaction/WorkflowInstance/TaskInstance model. Demonstrates store
//! pluggability (§9); not exercised by the committed test suite (no live
//! Postgres in this environment), but written to compile against the same
//! [`EventStore`] trait as [`super::InMemoryEventStore`].
//!
//! Row bodies are stored as `jsonb` snapshots of the domain types alongside a
//! handful of indexed columns (status, workflow/transaction id) so hot
//! queries — status lookups, stale-task reclamation — don't need to inflate
//! the whole row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::model::{TaskDefinition, TaskInstance, TaskStatus, Transaction, WorkflowDefinition, WorkflowInstance};

use super::{EventStore, StoreError};

/// `CREATE TABLE` statements a deployment applies via its own migration
/// tooling; not run by this crate.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS weave_transactions (
    transaction_id  TEXT PRIMARY KEY,
    status          TEXT NOT NULL,
    body            JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS weave_workflow_instances (
    workflow_id     UUID PRIMARY KEY,
    transaction_id  TEXT NOT NULL,
    status          TEXT NOT NULL,
    body            JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS weave_workflow_instances_tx_idx
    ON weave_workflow_instances (transaction_id);

CREATE TABLE IF NOT EXISTS weave_task_instances (
    task_id             UUID PRIMARY KEY,
    workflow_id         UUID NOT NULL,
    task_reference_name TEXT NOT NULL,
    status              TEXT NOT NULL,
    start_time          TIMESTAMPTZ NOT NULL,
    body                JSONB NOT NULL,
    UNIQUE (workflow_id, task_reference_name)
);
CREATE INDEX IF NOT EXISTS weave_task_instances_workflow_idx
    ON weave_task_instances (workflow_id);

CREATE TABLE IF NOT EXISTS weave_workflow_definitions (
    name    TEXT NOT NULL,
    rev     TEXT NOT NULL,
    body    JSONB NOT NULL,
    PRIMARY KEY (name, rev)
);

CREATE TABLE IF NOT EXISTS weave_task_definitions (
    name    TEXT PRIMARY KEY,
    body    JSONB NOT NULL
);
"#;

#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, transaction))]
    async fn create_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        let body = serde_json::to_value(&transaction)?;
        let result = sqlx::query(
            r#"INSERT INTO weave_transactions (transaction_id, status, body)
               VALUES ($1, $2, $3)
               ON CONFLICT (transaction_id) DO NOTHING"#,
        )
        .bind(&transaction.transaction_id)
        .bind(format!("{:?}", transaction.status))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create transaction: {e}");
            db_err(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TransactionAlreadyExists(transaction.transaction_id));
        }
        debug!(transaction_id = %transaction.transaction_id, "created transaction");
        Ok(())
    }

    #[instrument(skip(self, transaction))]
    async fn update_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        let body = serde_json::to_value(&transaction)?;
        let result = sqlx::query(
            r#"UPDATE weave_transactions SET status = $2, body = $3 WHERE transaction_id = $1"#,
        )
        .bind(&transaction.transaction_id)
        .bind(format!("{:?}", transaction.status))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TransactionNotFound(transaction.transaction_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, StoreError> {
        let row = sqlx::query(r#"SELECT body FROM weave_transactions WHERE transaction_id = $1"#)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.to_string()))?;
        let body: serde_json::Value = row.get("body");
        Ok(serde_json::from_value(body)?)
    }

    async fn delete_transaction(&self, transaction_id: &str) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM weave_transactions WHERE transaction_id = $1"#)
            .bind(transaction_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_workflow_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        let body = serde_json::to_value(&instance)?;
        sqlx::query(
            r#"INSERT INTO weave_workflow_instances (workflow_id, transaction_id, status, body)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(instance.workflow_id)
        .bind(&instance.transaction_id)
        .bind(format!("{:?}", instance.status))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_workflow_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        let body = serde_json::to_value(&instance)?;
        let result = sqlx::query(
            r#"UPDATE weave_workflow_instances SET status = $2, body = $3 WHERE workflow_id = $1"#,
        )
        .bind(instance.workflow_id)
        .bind(format!("{:?}", instance.status))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowInstanceNotFound(instance.workflow_id));
        }
        Ok(())
    }

    async fn get_workflow_instance(&self, workflow_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query(r#"SELECT body FROM weave_workflow_instances WHERE workflow_id = $1"#)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::WorkflowInstanceNotFound(workflow_id))?;
        let body: serde_json::Value = row.get("body");
        Ok(serde_json::from_value(body)?)
    }

    async fn get_workflow_instances_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let rows = sqlx::query(r#"SELECT body FROM weave_workflow_instances WHERE transaction_id = $1"#)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.get("body");
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }

    async fn delete_workflow_instance(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM weave_workflow_instances WHERE workflow_id = $1"#)
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError> {
        let body = serde_json::to_value(&instance)?;
        sqlx::query(
            r#"INSERT INTO weave_task_instances
                (task_id, workflow_id, task_reference_name, status, start_time, body)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(instance.task_id)
        .bind(instance.workflow_id)
        .bind(&instance.task_reference_name)
        .bind(format!("{:?}", instance.status))
        .bind(instance.start_time)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError> {
        let current = self.get_task_instance(instance.task_id).await?;
        if current.status != instance.status && !current.status.can_transition_to(instance.status) {
            return Err(StoreError::InvalidTransition {
                task_id: instance.task_id,
                from: current.status,
                to: instance.status,
            });
        }

        let body = serde_json::to_value(&instance)?;
        sqlx::query(r#"UPDATE weave_task_instances SET status = $2, body = $3 WHERE task_id = $1"#)
            .bind(instance.task_id)
            .bind(format!("{:?}", instance.status))
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn reload_task_instance(&self, instance: TaskInstance) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"DELETE FROM weave_task_instances WHERE workflow_id = $1 AND task_reference_name = $2"#,
        )
        .bind(instance.workflow_id)
        .bind(&instance.task_reference_name)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let body = serde_json::to_value(&instance)?;
        sqlx::query(
            r#"INSERT INTO weave_task_instances
                (task_id, workflow_id, task_reference_name, status, start_time, body)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(instance.task_id)
        .bind(instance.workflow_id)
        .bind(&instance.task_reference_name)
        .bind(format!("{:?}", instance.status))
        .bind(instance.start_time)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_task_instance(&self, task_id: Uuid) -> Result<TaskInstance, StoreError> {
        let row = sqlx::query(r#"SELECT body FROM weave_task_instances WHERE task_id = $1"#)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::TaskInstanceNotFound(task_id))?;
        let body: serde_json::Value = row.get("body");
        Ok(serde_json::from_value(body)?)
    }

    async fn get_all_task_instances(&self, workflow_id: Uuid) -> Result<Vec<TaskInstance>, StoreError> {
        let rows = sqlx::query(r#"SELECT body FROM weave_task_instances WHERE workflow_id = $1"#)
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.get("body");
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }

    async fn delete_task_instance(&self, task_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM weave_task_instances WHERE task_id = $1"#)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError> {
        // SELECT ... FOR UPDATE SKIP LOCKED: claiming-style read so multiple
        // reclaimers racing across partitions don't double-report the same
        // stale task.
        let cutoff: DateTime<Utc> = Utc::now() - chrono::Duration::from_std(stale_threshold)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = sqlx::query(
            r#"SELECT task_id FROM weave_task_instances
               WHERE status IN ('Scheduled', 'Inprogress') AND start_time < $1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.get("task_id")).collect())
    }

    async fn get_workflow_definition(&self, name: &str, rev: &str) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query(r#"SELECT body FROM weave_workflow_definitions WHERE name = $1 AND rev = $2"#)
            .bind(name)
            .bind(rev)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::WorkflowDefinitionNotFound(name.to_string(), rev.to_string()))?;
        let body: serde_json::Value = row.get("body");
        Ok(serde_json::from_value(body)?)
    }

    async fn list_workflow_definitions(&self, name: &str) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query(r#"SELECT body FROM weave_workflow_definitions WHERE name = $1"#)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.get("body");
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }

    async fn create_workflow_definition(&self, def: WorkflowDefinition) -> Result<(), StoreError> {
        let body = serde_json::to_value(&def)?;
        sqlx::query(
            r#"INSERT INTO weave_workflow_definitions (name, rev, body) VALUES ($1, $2, $3)
               ON CONFLICT (name, rev) DO UPDATE SET body = EXCLUDED.body"#,
        )
        .bind(&def.name)
        .bind(&def.rev)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_workflow_definition(&self, def: WorkflowDefinition) -> Result<(), StoreError> {
        let body = serde_json::to_value(&def)?;
        let result = sqlx::query(
            r#"UPDATE weave_workflow_definitions SET body = $3 WHERE name = $1 AND rev = $2"#,
        )
        .bind(&def.name)
        .bind(&def.rev)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowDefinitionNotFound(def.name, def.rev));
        }
        Ok(())
    }

    async fn get_task_definition(&self, name: &str) -> Result<TaskDefinition, StoreError> {
        let row = sqlx::query(r#"SELECT body FROM weave_task_definitions WHERE name = $1"#)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::TaskDefinitionNotFound(name.to_string()))?;
        let body: serde_json::Value = row.get("body");
        Ok(serde_json::from_value(body)?)
    }

    async fn list_task_definitions(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        let rows = sqlx::query(r#"SELECT body FROM weave_task_definitions"#)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.get("body");
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }

    async fn create_task_definition(&self, def: TaskDefinition) -> Result<(), StoreError> {
        let body = serde_json::to_value(&def)?;
        sqlx::query(
            r#"INSERT INTO weave_task_definitions (name, body) VALUES ($1, $2)
               ON CONFLICT (name) DO UPDATE SET body = EXCLUDED.body"#,
        )
        .bind(&def.name)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_task_definition(&self, def: TaskDefinition) -> Result<(), StoreError> {
        let body = serde_json::to_value(&def)?;
        let result = sqlx::query(r#"UPDATE weave_task_definitions SET body = $2 WHERE name = $1"#)
            .bind(&def.name)
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskDefinitionNotFound(def.name));
        }
        Ok(())
    }
}
