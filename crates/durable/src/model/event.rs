//! Outbound domain events (§6), the `sendEvent` wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::{TaskInstanceType, TaskStatus, TransactionStatus, WorkflowInstanceStatus, WorkflowInstanceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Transaction,
    Workflow,
    Task,
    System,
}

/// A single outbound event: `{transactionId, timestamp, type, isError,
/// details, error?}` per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub scope: EventScope,
    pub is_error: bool,
    pub details: serde_json::Value,
    pub error: Option<String>,
}

impl DomainEvent {
    pub fn transaction(transaction_id: impl Into<String>, status: TransactionStatus) -> Self {
        let transaction_id = transaction_id.into();
        Self {
            details: serde_json::json!({ "status": status }),
            transaction_id,
            timestamp: Utc::now(),
            scope: EventScope::Transaction,
            is_error: false,
            error: None,
        }
    }

    pub fn workflow(
        transaction_id: impl Into<String>,
        workflow_id: uuid::Uuid,
        r#type: WorkflowInstanceType,
        status: WorkflowInstanceStatus,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            timestamp: Utc::now(),
            scope: EventScope::Workflow,
            is_error: false,
            details: serde_json::json!({
                "workflowId": workflow_id,
                "type": type_tag(&r#type),
                "status": status,
            }),
            error: None,
        }
    }

    pub fn task(
        transaction_id: impl Into<String>,
        task_id: uuid::Uuid,
        task_reference_name: impl Into<String>,
        r#type: TaskInstanceType,
        status: TaskStatus,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            timestamp: Utc::now(),
            scope: EventScope::Task,
            is_error: false,
            details: serde_json::json!({
                "taskId": task_id,
                "taskReferenceName": task_reference_name.into(),
                "type": task_type_tag(&r#type),
                "status": status,
            }),
            error: None,
        }
    }

    pub fn error(transaction_id: impl Into<String>, scope: EventScope, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            transaction_id: transaction_id.into(),
            timestamp: Utc::now(),
            scope,
            is_error: true,
            details: serde_json::json!({ "message": message.clone() }),
            error: Some(message),
        }
    }
}

fn type_tag(t: &WorkflowInstanceType) -> &'static str {
    match t {
        WorkflowInstanceType::Workflow => "Workflow",
        WorkflowInstanceType::CompensateWorkflow => "CompensateWorkflow",
        WorkflowInstanceType::CompensateThenRetryWorkflow => "CompensateThenRetryWorkflow",
        WorkflowInstanceType::RetryWorkflow => "RetryWorkflow",
        WorkflowInstanceType::RecoveryWorkflow => "RecoveryWorkflow",
        WorkflowInstanceType::SubWorkflow => "SubWorkflow",
    }
}

fn task_type_tag(t: &TaskInstanceType) -> &'static str {
    match t {
        TaskInstanceType::Task => "Task",
        TaskInstanceType::Parallel => "Parallel",
        TaskInstanceType::Decision => "Decision",
        TaskInstanceType::SubWorkflow => "SubWorkflow",
        TaskInstanceType::Compensate => "Compensate",
        TaskInstanceType::Schedule => "Schedule",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_event_round_trips() {
        let event = DomainEvent::task(
            "tx-1",
            uuid::Uuid::nil(),
            "t1",
            TaskInstanceType::Task,
            TaskStatus::Scheduled,
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.transaction_id, "tx-1");
        assert!(!parsed.is_error);
    }

    #[test]
    fn error_event_sets_is_error() {
        let event = DomainEvent::error("tx-1", EventScope::Task, "boom");
        assert!(event.is_error);
        assert_eq!(event.error.as_deref(), Some("boom"));
    }
}
