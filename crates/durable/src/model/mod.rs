//! The data model (§3): workflow/task definitions, runtime instances, and
//! outbound domain events.

mod definition;
mod event;
mod instance;

pub use definition::{FailureStrategy, RetryConfig, TaskDefinition, TaskNode, WorkflowDefinition, WorkflowRef};
pub use event::{DomainEvent, EventScope};
pub use instance::{
    TaskChildren, TaskInstance, TaskInstanceType, TaskStatus, Transaction, TransactionStatus,
    WorkflowInstance, WorkflowInstanceStatus, WorkflowInstanceType,
};
