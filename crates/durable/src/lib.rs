//! # Weave Durable Execution Engine
//!
//! The state engine for a Conductor/Cadence-style workflow orchestrator: a
//! deterministic core that, given a workflow definition, the current
//! persisted instance state, and an incoming event, computes the next set
//! of actions — task dispatches, state transitions, event emissions, and
//! store mutations.
//!
//! ## Features
//!
//! - **Data-driven workflows**: task trees (sequence/parallel/decision/
//!   sub-workflow) are validated definitions, not user Rust code
//! - **Failure-recovery strategies**: retry, compensate, compensate-then-
//!   retry, recovery-workflow, and fail, all driven by the definition
//! - **Store-pluggable persistence**: an `EventStore` capability-set trait,
//!   with an in-memory reference implementation and a Postgres backend
//! - **In-process message bus**: `dispatch`/`sendEvent`/`sendTimer`,
//!   sufficient to drive the pipeline in tests and single-process
//!   deployments
//! - **OpenTelemetry-ready tracing**: every pipeline-processed update runs
//!   inside a `transaction_id`-keyed span
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EventPipeline (C6)                     │
//! │  groups task-update records by transactionId, single-writer  │
//! │  per partition, publishes effects after store writes commit  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  engine::state::apply (C4/C5)                │
//! │   transition table, workflow advancement, failure strategy   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    EventStore (C2, §4.5)                     │
//! │   Transaction / WorkflowInstance / TaskInstance persistence   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weave_durable::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryEventStore::new());
//! let (bus, _receivers) = InMemoryBus::new();
//! let pipeline = EventPipeline::new(store.clone(), Arc::new(bus), EngineConfig::default());
//!
//! let definition = WorkflowDefinition {
//!     name: "ship-order".into(),
//!     rev: "1".into(),
//!     tasks: vec![TaskNode::Task {
//!         task_reference_name: "charge".into(),
//!         name: "charge_card".into(),
//!     }],
//!     failure_strategy: FailureStrategy::Failed,
//!     retry: None,
//!     recovery_workflow: None,
//!     output_parameters: None,
//! };
//! start_transaction(store.as_ref(), "order-1", definition, serde_json::json!({"amount": 42})).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod reliability;
pub mod store;
pub mod system_task;
pub mod validation;

pub mod bench;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::bus::{AdminCommand, BusError, InMemoryBus, MessageBus, TimerEnvelope};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{apply, cancel_transaction, start_transaction, Effect, TaskStatusUpdate, TimerKind};
    pub use crate::error::EngineError;
    pub use crate::model::{
        DomainEvent, EventScope, FailureStrategy, RetryConfig, TaskChildren, TaskDefinition, TaskInstance,
        TaskInstanceType, TaskNode, TaskStatus, Transaction, TransactionStatus, WorkflowDefinition, WorkflowInstance,
        WorkflowInstanceStatus, WorkflowInstanceType, WorkflowRef,
    };
    pub use crate::pipeline::{BatchOutcome, EventPipeline, PartitionOutcome, PipelineError};
    pub use crate::store::{EventStore, InMemoryEventStore, PostgresEventStore, StoreError};
    pub use crate::validation::{validate, ValidationError};
}

// Re-export key types at the crate root.
pub use bus::{AdminCommand, BusError, InMemoryBus, MessageBus, TimerEnvelope};
pub use config::EngineConfig;
pub use engine::{apply, cancel_transaction, start_transaction, Effect, TaskStatusUpdate, TimerKind};
pub use error::EngineError;
pub use pipeline::{BatchOutcome, EventPipeline, PartitionOutcome, PipelineError};
pub use store::{EventStore, InMemoryEventStore, PostgresEventStore, StoreError};
pub use validation::{validate, ValidationError};
