//! Message-bus abstraction (§6): the `dispatch`/`sendEvent`/`sendTimer`
//! contracts the engine and pipeline depend on, plus the `task-update`/
//! `command` consumer topics. The bus client itself is an external
//! collaborator per §1 — this module only names the interface and ships one
//! concrete in-process implementation sufficient to drive the pipeline in
//! tests and single-process deployments; a networked binding is out of
//! scope.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::state::{Effect, TaskStatusUpdate, TimerKind};
use crate::model::{DomainEvent, TaskInstance};

/// An administrative command consumed from the `command` topic (§6,
/// SPEC_FULL §11): the one supplemental message shape §6 requires but never
/// spells out.
#[derive(Debug, Clone)]
pub enum AdminCommand {
    Cancel { transaction_id: String },
}

/// A delayed redelivery scheduled by [`MessageBus::send_timer`]: fires as a
/// synthetic [`TaskStatusUpdate`] once `delay` elapses (§4.6).
#[derive(Debug, Clone)]
pub struct TimerEnvelope {
    pub task_id: uuid::Uuid,
    pub delay: Duration,
    pub kind: TimerKind,
}

/// Errors raised by a bus backend. `Unavailable` is retried with backoff at
/// the pipeline boundary (§7); `Closed` means the backend will never accept
/// more work and is not retried.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("bus channel closed")]
    Closed,
}

/// The capability-set the engine and pipeline need from the bus (§6):
/// dispatch work to external task workers, publish domain events, and
/// schedule delayed redelivery for retries/timeouts.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Outbound to the topic keyed by `task.task_reference_name`'s
    /// underlying task name, for worker consumption.
    async fn dispatch(&self, task: TaskInstance, transaction_id: &str, is_system: bool) -> Result<(), BusError>;

    /// Outbound `TRANSACTION|WORKFLOW|TASK|SYSTEM` event.
    async fn send_event(&self, event: DomainEvent) -> Result<(), BusError>;

    /// Delayed message that redelivers as a synthetic update once
    /// `envelope.delay` elapses.
    async fn send_timer(&self, envelope: TimerEnvelope) -> Result<(), BusError>;
}

/// One dispatch record as seen by a worker consuming the task-name-keyed
/// topic: the full task instance plus routing metadata.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub task: TaskInstance,
    pub transaction_id: String,
    pub is_system: bool,
}

/// In-process `MessageBus`: a `tokio::sync::mpsc`-backed fan-out to three
/// named channels (dispatch, event, timer), sufficient to drive the
/// pipeline in tests and single-process deployments (§6). A networked bus
/// is out of scope per §1.
pub struct InMemoryBus {
    dispatch_tx: mpsc::UnboundedSender<DispatchRecord>,
    event_tx: mpsc::UnboundedSender<DomainEvent>,
    timer_tx: mpsc::UnboundedSender<TimerEnvelope>,
}

/// The receiving half of an [`InMemoryBus`], handed to whatever in-process
/// consumer plays the role of "worker" or "timer service" in tests.
pub struct InMemoryBusReceivers {
    pub dispatch_rx: mpsc::UnboundedReceiver<DispatchRecord>,
    pub event_rx: mpsc::UnboundedReceiver<DomainEvent>,
    pub timer_rx: mpsc::UnboundedReceiver<TimerEnvelope>,
}

impl InMemoryBus {
    pub fn new() -> (Self, InMemoryBusReceivers) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        (
            Self { dispatch_tx, event_tx, timer_tx },
            InMemoryBusReceivers { dispatch_rx, event_rx, timer_rx },
        )
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn dispatch(&self, task: TaskInstance, transaction_id: &str, is_system: bool) -> Result<(), BusError> {
        self.dispatch_tx
            .send(DispatchRecord {
                task,
                transaction_id: transaction_id.to_string(),
                is_system,
            })
            .map_err(|_| BusError::Closed)
    }

    async fn send_event(&self, event: DomainEvent) -> Result<(), BusError> {
        self.event_tx.send(event).map_err(|_| BusError::Closed)
    }

    async fn send_timer(&self, envelope: TimerEnvelope) -> Result<(), BusError> {
        self.timer_tx.send(envelope).map_err(|_| BusError::Closed)
    }
}

/// Publish a single [`Effect`] to `bus`. Timers carry their `subject_id` as
/// the task id a synthetic update will later target.
pub async fn publish_effect(bus: &dyn MessageBus, transaction_id: &str, effect: Effect) -> Result<(), BusError> {
    match effect {
        Effect::Dispatch(task) => {
            let is_system = task.is_system();
            bus.dispatch(task, transaction_id, is_system).await
        }
        Effect::Event(event) => bus.send_event(event).await,
        Effect::Timer { subject_id, delay, kind } => {
            bus.send_timer(TimerEnvelope {
                task_id: subject_id,
                delay,
                kind,
            })
            .await
        }
    }
}
