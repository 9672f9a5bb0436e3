//! Runtime instances: [`Transaction`], [`WorkflowInstance`], [`TaskInstance`].
//!
//! Instances are owned by the engine; stores only materialize them, and
//! cross-partition references are always by id, never by pointer (§9).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::definition::{TaskNode, WorkflowDefinition, WorkflowRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Compensated,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Compensated
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub create_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// The currently active workflow instance driving this transaction. A
    /// transaction can carry more than one workflow instance over its
    /// lifetime (retry/compensate/recovery all synthesize a fresh one), but
    /// only one is active at a time.
    pub active_workflow_id: Uuid,
}

impl Transaction {
    pub fn new(transaction_id: impl Into<String>, input: serde_json::Value, workflow_id: Uuid) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status: TransactionStatus::Running,
            input,
            output: None,
            create_time: Utc::now(),
            end_time: None,
            active_workflow_id: workflow_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowInstanceType {
    Workflow,
    CompensateWorkflow,
    CompensateThenRetryWorkflow,
    RetryWorkflow,
    RecoveryWorkflow,
    SubWorkflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowInstanceStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl WorkflowInstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: Uuid,
    pub transaction_id: String,
    pub r#type: WorkflowInstanceType,
    pub status: WorkflowInstanceStatus,
    /// Owned snapshot of the definition this instance is running; never
    /// mutated once the instance is created.
    pub definition: WorkflowDefinition,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub retries: u32,
    pub create_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(
        workflow_id: Uuid,
        transaction_id: impl Into<String>,
        r#type: WorkflowInstanceType,
        definition: WorkflowDefinition,
        input: serde_json::Value,
    ) -> Self {
        Self {
            workflow_id,
            transaction_id: transaction_id.into(),
            r#type,
            status: WorkflowInstanceStatus::Running,
            definition,
            input,
            output: None,
            retries: 0,
            create_time: Utc::now(),
            end_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskInstanceType {
    Task,
    Parallel,
    Decision,
    SubWorkflow,
    Compensate,
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Inprogress,
    Completed,
    Failed,
    AckTimeOut,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::AckTimeOut | Self::Timeout
        )
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Scheduled | Self::Inprogress)
    }

    /// Whether transitioning `self -> to` is legal per the table in §4.2.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Scheduled, Inprogress) => true,
            (Scheduled, Completed | Failed | AckTimeOut | Timeout) => true,
            (Inprogress, Completed | Failed | Timeout) => true,
            _ => false,
        }
    }
}

/// Structural payload carried over from the definition so traversal can
/// proceed without re-reading the workflow definition (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskChildren {
    None,
    Parallel { lanes: Vec<Vec<TaskNode>> },
    Decision {
        expression: String,
        decisions: std::collections::HashMap<String, Vec<TaskNode>>,
        default_decision: Vec<TaskNode>,
        /// Set once C7 evaluates the expression and a branch is chosen.
        chosen: Option<String>,
    },
    SubWorkflow {
        workflow: WorkflowRef,
        /// Set once the child workflow instance is materialized.
        child_workflow_id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub transaction_id: String,
    pub r#type: TaskInstanceType,
    pub task_reference_name: String,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub retries: u32,
    pub is_retried: bool,
    pub retry_delay: Duration,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub logs: Option<String>,
    pub children: TaskChildren,
}

impl TaskInstance {
    pub fn is_system(&self) -> bool {
        matches!(
            self.r#type,
            TaskInstanceType::Parallel
                | TaskInstanceType::Decision
                | TaskInstanceType::SubWorkflow
                | TaskInstanceType::Schedule
        )
    }
}
