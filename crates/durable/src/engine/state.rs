//! State Engine (C4, §4.2): `apply` and the surrounding machinery that
//! drives a transaction from a client-supplied `TaskStatusUpdate` (or an
//! administrative command) to its next persisted state, consulting
//! [`super::traversal`] (C3) and [`super::failure`] (C5) along the way.
//!
//! Mutual recursion runs through this module: a terminal task update can
//! advance a workflow to completion, which can spawn a fresh workflow
//! instance (retry/compensate/recovery), which is immediately driven to its
//! own first schedule — all within one call. Every cycle of that recursion
//! passes through a [`futures::future::BoxFuture`], so the otherwise
//! self-referential `async fn` chain (`apply` → `advance_workflow` → `drive`
//! → `schedule_node`/`complete_workflow`/`fail_workflow` → `apply`) has a
//! bounded state-machine size.

use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    DomainEvent, EventScope, FailureStrategy, TaskChildren, TaskInstance, TaskInstanceType, TaskNode, TaskStatus,
    Transaction, TransactionStatus, WorkflowDefinition, WorkflowInstance, WorkflowInstanceStatus, WorkflowInstanceType,
};
use crate::store::{EventStore, StoreError};

use super::failure::{self, FailurePlan};
use super::reference::{self, ReferenceContext};
use super::traversal::{self, Outcome};

/// Inbound update, the wire shape of §6's `task-update` topic.
#[derive(Debug, Clone)]
pub struct TaskStatusUpdate {
    pub transaction_id: String,
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub logs: Option<String>,
    pub is_system: bool,
}

/// A timer this update implies, consumed by the pipeline's side timer topic
/// (§4.6) and redelivered as a synthetic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Retry,
    AckTimeout,
    Timeout,
}

/// An outbound effect the caller (C6) is responsible for actually sending;
/// `apply`/`start_transaction` never touch the bus directly.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Dispatch a task to an external worker.
    Dispatch(TaskInstance),
    /// Publish a domain event.
    Event(DomainEvent),
    /// Schedule delayed redelivery against `subject_id` (a task id for
    /// retries/timeouts).
    Timer {
        subject_id: Uuid,
        delay: Duration,
        kind: TimerKind,
    },
}

/// Begin a transaction: validate the definition, materialize the root
/// workflow instance, and drive it to its first scheduled task(s)
/// (scenario 1: `TRANSACTION Running`, `WORKFLOW Running`, `TASK t1
/// Scheduled`, ...).
pub async fn start_transaction(
    store: &dyn EventStore,
    transaction_id: impl Into<String>,
    definition: WorkflowDefinition,
    input: Value,
) -> Result<Vec<Effect>, EngineError> {
    crate::validation::validate(&definition).map_err(EngineError::InvalidDefinition)?;

    let transaction_id = transaction_id.into();
    let workflow_id = Uuid::now_v7();
    let transaction = Transaction::new(transaction_id.clone(), input.clone(), workflow_id);
    store.create_transaction(transaction).await?;

    let instance = WorkflowInstance::new(workflow_id, transaction_id.clone(), WorkflowInstanceType::Workflow, definition, input);
    store.create_workflow_instance(instance).await?;

    let mut effects = vec![
        Effect::Event(DomainEvent::transaction(&transaction_id, TransactionStatus::Running)),
        Effect::Event(DomainEvent::workflow(
            &transaction_id,
            workflow_id,
            WorkflowInstanceType::Workflow,
            WorkflowInstanceStatus::Running,
        )),
    ];
    effects.extend(drive(store, workflow_id).await?);
    Ok(effects)
}

/// Administrative cancellation (§5, §11): force the transaction and every
/// non-terminal workflow/task instance to `Cancelled`. No compensation runs,
/// even mid-`CompensateWorkflow` (Open Question (c)).
pub async fn cancel_transaction(store: &dyn EventStore, transaction_id: &str) -> Result<Vec<Effect>, EngineError> {
    let mut effects = Vec::new();
    let mut transaction = store.get_transaction(transaction_id).await?;
    if transaction.status.is_terminal() {
        return Ok(effects);
    }

    for mut workflow in store.get_workflow_instances_by_transaction_id(transaction_id).await? {
        if workflow.status.is_terminal() {
            continue;
        }
        for mut task in store.get_all_task_instances(workflow.workflow_id).await? {
            if task.status.is_live() {
                task.status = TaskStatus::Failed;
                task.end_time = Some(Utc::now());
                // `update_task_instance` enforces the transition table, which
                // allows Scheduled|Inprogress -> Failed; reused here as the
                // closest terminal status for a cancelled task.
                store.update_task_instance(task.clone()).await?;
                effects.push(Effect::Event(DomainEvent::task(
                    transaction_id,
                    task.task_id,
                    &task.task_reference_name,
                    task.r#type,
                    TaskStatus::Failed,
                )));
            }
        }
        workflow.status = WorkflowInstanceStatus::Cancelled;
        workflow.end_time = Some(Utc::now());
        store.update_workflow_instance(workflow.clone()).await?;
        effects.push(Effect::Event(DomainEvent::workflow(
            transaction_id,
            workflow.workflow_id,
            workflow.r#type,
            WorkflowInstanceStatus::Cancelled,
        )));
    }

    transaction.status = TransactionStatus::Cancelled;
    transaction.end_time = Some(Utc::now());
    store.update_transaction(transaction).await?;
    effects.push(Effect::Event(DomainEvent::transaction(transaction_id, TransactionStatus::Cancelled)));
    Ok(effects)
}

/// Apply a single task-status update (§4.2, steps 1-5).
pub async fn apply(store: &dyn EventStore, update: TaskStatusUpdate) -> Result<Vec<Effect>, EngineError> {
    let task = match store.get_task_instance(update.task_id).await {
        Ok(task) => task,
        Err(StoreError::TaskInstanceNotFound(_)) => {
            return Ok(vec![Effect::Event(DomainEvent::error(
                &update.transaction_id,
                EventScope::Task,
                format!("task not found: {}", update.task_id),
            ))]);
        }
        Err(e) => return Err(e.into()),
    };

    if task.transaction_id != update.transaction_id {
        return Ok(vec![Effect::Event(DomainEvent::error(
            &update.transaction_id,
            EventScope::Task,
            "transactionId mismatch",
        ))]);
    }

    // Idempotent resubmission: identical status and output, dropped silently
    // (Open Question (a)).
    if update.status == task.status && update.output == task.output {
        return Ok(vec![]);
    }

    if !task.status.can_transition_to(update.status) {
        return Ok(vec![Effect::Event(DomainEvent::error(
            &update.transaction_id,
            EventScope::Task,
            format!("invalid transition {:?} -> {:?}", task.status, update.status),
        ))]);
    }

    let mut effects = Vec::new();

    // A terminal status posted directly from Scheduled implies an Inprogress
    // transition the worker never reported; emit it first so the event
    // stream stays monotone (§9 Design Notes).
    if task.status == TaskStatus::Scheduled && update.status.is_terminal() {
        effects.push(Effect::Event(DomainEvent::task(
            &update.transaction_id,
            task.task_id,
            &task.task_reference_name,
            task.r#type,
            TaskStatus::Inprogress,
        )));
    }

    let mut updated = task.clone();
    updated.status = update.status;
    if update.output.is_some() {
        updated.output = update.output.clone();
    }
    if update.logs.is_some() {
        updated.logs = update.logs.clone();
    }
    if updated.status.is_terminal() {
        updated.end_time = Some(Utc::now());
    }

    store.update_task_instance(updated.clone()).await?;
    effects.push(Effect::Event(DomainEvent::task(
        &update.transaction_id,
        updated.task_id,
        &updated.task_reference_name,
        updated.r#type,
        updated.status,
    )));

    if updated.status.is_terminal() {
        effects.extend(advance_workflow(store, updated).await?);
    } else if updated.status == TaskStatus::Inprogress {
        // A task that just left `Scheduled` starts its `timeoutSecond`
        // clock (the `ackTimeoutSecond` timer set at dispatch is implicitly
        // superseded since the worker did ack); §4.6/§5.
        if let Some(delay) = task_timeout(store, &updated, TimeoutField::TimeoutSecond).await {
            effects.push(Effect::Timer {
                subject_id: updated.task_id,
                delay,
                kind: TimerKind::Timeout,
            });
        }
    }

    Ok(effects)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeoutField {
    AckTimeoutSecond,
    TimeoutSecond,
}

/// Look up the configured `ackTimeoutSecond`/`timeoutSecond` for `task`'s
/// task definition, if any (§3 `TaskDefinition`, §4.6 timer scheduling).
/// Best-effort: an unregistered task definition simply means no timer is
/// scheduled (C1 does not check referential integrity against the registry,
/// §4.1).
async fn task_timeout(store: &dyn EventStore, task: &TaskInstance, field: TimeoutField) -> Option<Duration> {
    let workflow = store.get_workflow_instance(task.workflow_id).await.ok()?;
    let def_name = find_task_def_name(&workflow.definition.tasks, &task.task_reference_name)?;
    let def = store.get_task_definition(def_name).await.ok()?;
    let secs = match field {
        TimeoutField::AckTimeoutSecond => def.ack_timeout_second,
        TimeoutField::TimeoutSecond => def.timeout_second,
    }?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn advance_workflow(store: &dyn EventStore, task: TaskInstance) -> BoxFuture<'_, Result<Vec<Effect>, EngineError>> {
    Box::pin(async move {
        let workflow = store.get_workflow_instance(task.workflow_id).await?;

        if task.status != TaskStatus::Completed && !task.is_system() {
            let task_def_name = find_task_def_name(&workflow.definition.tasks, &task.task_reference_name);
            let retry_config = match task_def_name {
                Some(name) => store
                    .get_task_definition(name)
                    .await
                    .ok()
                    .and_then(|def| def.retry),
                None => None,
            };

            if let failure::TaskRetryDecision::Reload { delay } = failure::plan_task_retry(retry_config.as_ref(), &task) {
                let mut retried = task.clone();
                retried.task_id = Uuid::now_v7();
                retried.status = TaskStatus::Scheduled;
                retried.retries += 1;
                retried.is_retried = true;
                retried.retry_delay = delay;
                retried.output = None;
                retried.logs = None;
                retried.end_time = None;
                retried.start_time = Utc::now();
                store.reload_task_instance(retried.clone()).await?;

                let mut effects = vec![Effect::Event(DomainEvent::task(
                    &task.transaction_id,
                    retried.task_id,
                    &retried.task_reference_name,
                    retried.r#type,
                    TaskStatus::Scheduled,
                ))];
                if delay == Duration::ZERO {
                    if let Some(ack_delay) = task_timeout(store, &retried, TimeoutField::AckTimeoutSecond).await {
                        effects.push(Effect::Timer {
                            subject_id: retried.task_id,
                            delay: ack_delay,
                            kind: TimerKind::AckTimeout,
                        });
                    }
                    effects.push(Effect::Dispatch(retried));
                } else {
                    effects.push(Effect::Timer {
                        subject_id: retried.task_id,
                        delay,
                        kind: TimerKind::Retry,
                    });
                }
                return Ok(effects);
            }
        }

        drive(store, workflow.workflow_id).await
    })
}

/// Re-evaluate a workflow instance's tree and act on the result: schedule
/// newly-runnable nodes, or finalize the instance (and its transaction) on
/// `Complete`/`Failed`.
fn drive(store: &dyn EventStore, workflow_id: Uuid) -> BoxFuture<'_, Result<Vec<Effect>, EngineError>> {
    Box::pin(async move {
        let workflow = store.get_workflow_instance(workflow_id).await?;
        if workflow.status.is_terminal() {
            return Ok(vec![]);
        }

        let all_tasks = store.get_all_task_instances(workflow_id).await?;
        match traversal::evaluate(&workflow, &all_tasks) {
            Outcome::InProgress => Ok(vec![]),
            Outcome::Complete => complete_workflow(store, workflow, &all_tasks).await,
            Outcome::Failed(failing_ref) => fail_workflow(store, workflow, &failing_ref, &all_tasks).await,
            Outcome::Schedule(nodes) => {
                let mut effects = Vec::new();
                for node in nodes {
                    effects.extend(schedule_node(store, &workflow, &node).await?);
                }
                Ok(effects)
            }
        }
    })
}

/// Input for a newly scheduled node. Ordinary nodes pass the workflow
/// instance's own input straight through (the data model has no per-task
/// input template); a synthesized `Compensate` workflow instead stashes each
/// compensate task's input — the original task's output — under
/// `compensateInputs` on its own `input` value at synthesis time (see
/// [`execute_failure_plan`]).
fn resolve_task_input(workflow: &WorkflowInstance, task_reference_name: &str) -> Value {
    match workflow.r#type {
        WorkflowInstanceType::CompensateWorkflow | WorkflowInstanceType::CompensateThenRetryWorkflow => workflow
            .input
            .get("compensateInputs")
            .and_then(|m| m.get(task_reference_name))
            .cloned()
            .unwrap_or(Value::Null),
        _ => workflow.input.clone(),
    }
}

async fn schedule_node(store: &dyn EventStore, workflow: &WorkflowInstance, node: &TaskNode) -> Result<Vec<Effect>, EngineError> {
    let ref_name = node.task_reference_name().to_string();
    let is_compensate_workflow = matches!(
        workflow.r#type,
        WorkflowInstanceType::CompensateWorkflow | WorkflowInstanceType::CompensateThenRetryWorkflow
    );
    let (instance_type, children) = match node {
        // A compensate workflow's own tasks are synthesized as plain `Task`
        // nodes (§4.3: reusing the tree-traversal machinery), but the
        // resulting instances carry `type=Compensate` (scenario 4: "TASK t2
        // Scheduled type=Compensate"), not `Task`.
        TaskNode::Task { .. } if is_compensate_workflow => (TaskInstanceType::Compensate, TaskChildren::None),
        TaskNode::Task { .. } => (TaskInstanceType::Task, TaskChildren::None),
        TaskNode::Parallel { lanes, .. } => (
            TaskInstanceType::Parallel,
            TaskChildren::Parallel { lanes: lanes.clone() },
        ),
        TaskNode::Decision {
            expression,
            decisions,
            default_decision,
            ..
        } => (
            TaskInstanceType::Decision,
            TaskChildren::Decision {
                expression: expression.clone(),
                decisions: decisions.clone(),
                default_decision: default_decision.clone(),
                chosen: None,
            },
        ),
        TaskNode::SubWorkflow { workflow: target, .. } => (
            TaskInstanceType::SubWorkflow,
            TaskChildren::SubWorkflow {
                workflow: target.clone(),
                child_workflow_id: None,
            },
        ),
    };

    let task_id = Uuid::now_v7();
    let instance = TaskInstance {
        task_id,
        workflow_id: workflow.workflow_id,
        transaction_id: workflow.transaction_id.clone(),
        r#type: instance_type,
        task_reference_name: ref_name.clone(),
        status: TaskStatus::Scheduled,
        input: resolve_task_input(workflow, &ref_name),
        output: None,
        retries: 0,
        is_retried: false,
        retry_delay: Duration::ZERO,
        start_time: Utc::now(),
        end_time: None,
        logs: None,
        children,
    };
    store.create_task_instance(instance.clone()).await?;

    let mut effects = vec![Effect::Event(DomainEvent::task(
        &workflow.transaction_id,
        task_id,
        &ref_name,
        instance_type,
        TaskStatus::Scheduled,
    ))];

    match node {
        TaskNode::Task { .. } => {
            if let Some(ack_delay) = task_timeout(store, &instance, TimeoutField::AckTimeoutSecond).await {
                effects.push(Effect::Timer {
                    subject_id: instance.task_id,
                    delay: ack_delay,
                    kind: TimerKind::AckTimeout,
                });
            }
            effects.push(Effect::Dispatch(instance));
        }
        TaskNode::Decision { .. } => {
            let all_tasks = store.get_all_task_instances(workflow.workflow_id).await?;
            let ctx = build_reference_context(workflow, &all_tasks);
            let outcome = crate::system_task::evaluate_decision(node, &ctx);
            let mut with_children = instance.clone();
            with_children.children = outcome.children;
            store.update_task_instance(with_children).await?;

            let completion = TaskStatusUpdate {
                transaction_id: workflow.transaction_id.clone(),
                task_id,
                status: TaskStatus::Completed,
                output: Some(outcome.output),
                logs: None,
                is_system: true,
            };
            effects.extend(apply(store, completion).await?);
        }
        TaskNode::Parallel { lanes, .. } => {
            if lanes.is_empty() {
                // Boundary behaviour (§8): a zero-lane Parallel completes on
                // creation.
                let completion = TaskStatusUpdate {
                    transaction_id: workflow.transaction_id.clone(),
                    task_id,
                    status: TaskStatus::Completed,
                    output: None,
                    logs: None,
                    is_system: true,
                };
                effects.extend(apply(store, completion).await?);
            } else {
                effects.extend(drive(store, workflow.workflow_id).await?);
            }
        }
        TaskNode::SubWorkflow { workflow: target, .. } => {
            let child_def = store.get_workflow_definition(&target.name, &target.rev).await?;
            let child_id = Uuid::now_v7();
            let child_input = resolve_task_input(workflow, &ref_name);
            let child_instance =
                WorkflowInstance::new(child_id, workflow.transaction_id.clone(), WorkflowInstanceType::SubWorkflow, child_def, child_input);
            store.create_workflow_instance(child_instance.clone()).await?;

            let mut with_children = instance.clone();
            with_children.status = TaskStatus::Inprogress;
            with_children.children = TaskChildren::SubWorkflow {
                workflow: target.clone(),
                child_workflow_id: Some(child_id),
            };
            store.update_task_instance(with_children).await?;

            effects.push(Effect::Event(DomainEvent::workflow(
                &workflow.transaction_id,
                child_id,
                WorkflowInstanceType::SubWorkflow,
                WorkflowInstanceStatus::Running,
            )));
            effects.extend(drive(store, child_id).await?);
        }
    }

    Ok(effects)
}

async fn complete_workflow(
    store: &dyn EventStore,
    mut workflow: WorkflowInstance,
    all_tasks: &[TaskInstance],
) -> Result<Vec<Effect>, EngineError> {
    workflow.status = WorkflowInstanceStatus::Completed;
    workflow.end_time = Some(Utc::now());
    if let Some(params) = workflow.definition.output_parameters.clone() {
        let ctx = build_reference_context(&workflow, all_tasks);
        let mut out = serde_json::Map::new();
        for (key, template) in params {
            out.insert(key, reference::resolve(&Value::String(template), &ctx));
        }
        workflow.output = Some(Value::Object(out));
    }
    store.update_workflow_instance(workflow.clone()).await?;

    let mut effects = vec![Effect::Event(DomainEvent::workflow(
        &workflow.transaction_id,
        workflow.workflow_id,
        workflow.r#type,
        WorkflowInstanceStatus::Completed,
    ))];

    match workflow.r#type {
        WorkflowInstanceType::Workflow | WorkflowInstanceType::RetryWorkflow | WorkflowInstanceType::RecoveryWorkflow => {
            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.status = TransactionStatus::Completed;
            transaction.output = workflow.output.clone();
            transaction.end_time = Some(Utc::now());
            store.update_transaction(transaction).await?;
            effects.push(Effect::Event(DomainEvent::transaction(
                &workflow.transaction_id,
                TransactionStatus::Completed,
            )));
        }
        WorkflowInstanceType::CompensateWorkflow => {
            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.status = TransactionStatus::Compensated;
            transaction.end_time = Some(Utc::now());
            store.update_transaction(transaction).await?;
            effects.push(Effect::Event(DomainEvent::transaction(
                &workflow.transaction_id,
                TransactionStatus::Compensated,
            )));
        }
        WorkflowInstanceType::CompensateThenRetryWorkflow => {
            effects.extend(restart_after_compensation(store, &workflow).await?);
        }
        WorkflowInstanceType::SubWorkflow => {
            effects.extend(propagate_subworkflow_result(store, &workflow, TaskStatus::Completed).await?);
        }
    }

    Ok(effects)
}

async fn fail_workflow(
    store: &dyn EventStore,
    mut workflow: WorkflowInstance,
    failing_ref: &str,
    all_tasks: &[TaskInstance],
) -> Result<Vec<Effect>, EngineError> {
    let _ = failing_ref; // retained for tracing/diagnostics at the call sites that log it
    workflow.status = WorkflowInstanceStatus::Failed;
    workflow.end_time = Some(Utc::now());
    store.update_workflow_instance(workflow.clone()).await?;

    let mut effects = vec![Effect::Event(DomainEvent::workflow(
        &workflow.transaction_id,
        workflow.workflow_id,
        workflow.r#type,
        WorkflowInstanceStatus::Failed,
    ))];

    match workflow.r#type {
        WorkflowInstanceType::CompensateWorkflow | WorkflowInstanceType::CompensateThenRetryWorkflow => {
            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.status = TransactionStatus::Failed;
            transaction.end_time = Some(Utc::now());
            store.update_transaction(transaction).await?;
            effects.push(Effect::Event(DomainEvent::transaction(&workflow.transaction_id, TransactionStatus::Failed)));
        }
        WorkflowInstanceType::SubWorkflow => {
            effects.extend(propagate_subworkflow_result(store, &workflow, TaskStatus::Failed).await?);
        }
        WorkflowInstanceType::Workflow | WorkflowInstanceType::RetryWorkflow | WorkflowInstanceType::RecoveryWorkflow => {
            let plan = failure::plan_workflow_failure(&workflow, all_tasks);
            effects.extend(execute_failure_plan(store, workflow, plan).await?);
        }
    }

    Ok(effects)
}

async fn execute_failure_plan(
    store: &dyn EventStore,
    workflow: WorkflowInstance,
    plan: FailurePlan,
) -> Result<Vec<Effect>, EngineError> {
    match plan {
        FailurePlan::Fail => {
            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.status = TransactionStatus::Failed;
            transaction.end_time = Some(Utc::now());
            store.update_transaction(transaction).await?;
            Ok(vec![Effect::Event(DomainEvent::transaction(&workflow.transaction_id, TransactionStatus::Failed))])
        }
        FailurePlan::RetryWorkflow { delay } => {
            let mut fresh = WorkflowInstance::new(
                Uuid::now_v7(),
                workflow.transaction_id.clone(),
                WorkflowInstanceType::RetryWorkflow,
                workflow.definition.clone(),
                workflow.input.clone(),
            );
            fresh.retries = workflow.retries + 1;
            store.create_workflow_instance(fresh.clone()).await?;

            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.active_workflow_id = fresh.workflow_id;
            transaction.status = TransactionStatus::Running;
            store.update_transaction(transaction).await?;

            let mut effects = vec![Effect::Event(DomainEvent::workflow(
                &workflow.transaction_id,
                fresh.workflow_id,
                WorkflowInstanceType::RetryWorkflow,
                WorkflowInstanceStatus::Running,
            ))];
            if delay > Duration::ZERO {
                effects.push(Effect::Timer {
                    subject_id: fresh.workflow_id,
                    delay,
                    kind: TimerKind::Retry,
                });
            }
            effects.extend(drive(store, fresh.workflow_id).await?);
            Ok(effects)
        }
        FailurePlan::Compensate { tasks, then_retry } => {
            let mut compensate_inputs = serde_json::Map::new();
            let mut compensate_nodes = Vec::with_capacity(tasks.len());
            for task in &tasks {
                compensate_inputs.insert(task.task_reference_name.clone(), task.input.clone());
                compensate_nodes.push(TaskNode::Task {
                    task_reference_name: task.task_reference_name.clone(),
                    name: task.name.clone(),
                });
            }

            let mut synthesized_input = serde_json::Map::new();
            synthesized_input.insert("compensateInputs".into(), Value::Object(compensate_inputs));
            if then_retry {
                synthesized_input.insert(
                    "restart".into(),
                    serde_json::json!({
                        "definition": serde_json::to_value(&workflow.definition)?,
                        "input": workflow.input,
                    }),
                );
            }

            let compensate_def = WorkflowDefinition {
                name: format!("{}::compensate", workflow.definition.name),
                rev: workflow.definition.rev.clone(),
                tasks: compensate_nodes,
                failure_strategy: FailureStrategy::Failed,
                retry: None,
                recovery_workflow: None,
                output_parameters: None,
            };
            let instance_type = if then_retry {
                WorkflowInstanceType::CompensateThenRetryWorkflow
            } else {
                WorkflowInstanceType::CompensateWorkflow
            };
            let compensate_instance = WorkflowInstance::new(
                Uuid::now_v7(),
                workflow.transaction_id.clone(),
                instance_type,
                compensate_def,
                Value::Object(synthesized_input),
            );
            store.create_workflow_instance(compensate_instance.clone()).await?;

            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.active_workflow_id = compensate_instance.workflow_id;
            store.update_transaction(transaction).await?;

            let mut effects = vec![Effect::Event(DomainEvent::workflow(
                &workflow.transaction_id,
                compensate_instance.workflow_id,
                instance_type,
                WorkflowInstanceStatus::Running,
            ))];
            effects.extend(drive(store, compensate_instance.workflow_id).await?);
            Ok(effects)
        }
        FailurePlan::RecoveryWorkflow(target) => {
            let def = store.get_workflow_definition(&target.name, &target.rev).await?;
            let fresh = WorkflowInstance::new(
                Uuid::now_v7(),
                workflow.transaction_id.clone(),
                WorkflowInstanceType::RecoveryWorkflow,
                def,
                workflow.input.clone(),
            );
            store.create_workflow_instance(fresh.clone()).await?;

            let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
            transaction.active_workflow_id = fresh.workflow_id;
            transaction.status = TransactionStatus::Running;
            store.update_transaction(transaction).await?;

            let mut effects = vec![Effect::Event(DomainEvent::workflow(
                &workflow.transaction_id,
                fresh.workflow_id,
                WorkflowInstanceType::RecoveryWorkflow,
                WorkflowInstanceStatus::Running,
            ))];
            effects.extend(drive(store, fresh.workflow_id).await?);
            Ok(effects)
        }
    }
}

/// `CompensateThenRetry` (scenario 6): once compensation completes, restart
/// from the *original* definition and input, stashed on the compensate
/// instance's own `input` under `restart` when it was synthesized. The
/// restarted instance is plain `type=Workflow`, not a distinct variant.
async fn restart_after_compensation(store: &dyn EventStore, workflow: &WorkflowInstance) -> Result<Vec<Effect>, EngineError> {
    let restart = workflow.input.get("restart").cloned().unwrap_or(Value::Null);
    let definition: WorkflowDefinition = serde_json::from_value(restart.get("definition").cloned().unwrap_or(Value::Null))?;
    let input = restart.get("input").cloned().unwrap_or(Value::Null);

    let fresh = WorkflowInstance::new(Uuid::now_v7(), workflow.transaction_id.clone(), WorkflowInstanceType::Workflow, definition, input);
    store.create_workflow_instance(fresh.clone()).await?;

    let mut transaction = store.get_transaction(&workflow.transaction_id).await?;
    transaction.active_workflow_id = fresh.workflow_id;
    transaction.status = TransactionStatus::Running;
    store.update_transaction(transaction).await?;

    let mut effects = vec![Effect::Event(DomainEvent::workflow(
        &workflow.transaction_id,
        fresh.workflow_id,
        WorkflowInstanceType::Workflow,
        WorkflowInstanceStatus::Running,
    ))];
    effects.extend(drive(store, fresh.workflow_id).await?);
    Ok(effects)
}

/// Find the live `SubWorkflow` task instance (in a sibling workflow
/// instance, same transaction) awaiting `child`'s outcome, and feed it back
/// into `apply` as a synthetic update.
async fn propagate_subworkflow_result(
    store: &dyn EventStore,
    child: &WorkflowInstance,
    status: TaskStatus,
) -> Result<Vec<Effect>, EngineError> {
    for parent in store.get_workflow_instances_by_transaction_id(&child.transaction_id).await? {
        if parent.workflow_id == child.workflow_id {
            continue;
        }
        for task in store.get_all_task_instances(parent.workflow_id).await? {
            if let TaskChildren::SubWorkflow {
                child_workflow_id: Some(id),
                ..
            } = &task.children
            {
                if *id == child.workflow_id && task.status.is_live() {
                    let update = TaskStatusUpdate {
                        transaction_id: child.transaction_id.clone(),
                        task_id: task.task_id,
                        status,
                        output: child.output.clone(),
                        logs: None,
                        is_system: true,
                    };
                    return apply(store, update).await;
                }
            }
        }
    }
    Ok(vec![])
}

fn build_reference_context(workflow: &WorkflowInstance, all_tasks: &[TaskInstance]) -> ReferenceContext {
    let mut ctx = ReferenceContext::new(workflow.input.clone());
    if let Some(output) = &workflow.output {
        ctx.set_workflow_output(output.clone());
    }
    for task in all_tasks {
        ctx.record_task(task.task_reference_name.clone(), task.input.clone(), task.output.clone());
    }
    ctx
}

fn find_task_def_name<'a>(nodes: &'a [TaskNode], task_reference_name: &str) -> Option<&'a str> {
    for node in nodes {
        match node {
            TaskNode::Task {
                task_reference_name: ref_name,
                name,
            } if ref_name == task_reference_name => return Some(name),
            TaskNode::Parallel { lanes, .. } => {
                for lane in lanes {
                    if let Some(found) = find_task_def_name(lane, task_reference_name) {
                        return Some(found);
                    }
                }
            }
            TaskNode::Decision {
                decisions,
                default_decision,
                ..
            } => {
                if let Some(found) = find_task_def_name(default_decision, task_reference_name) {
                    return Some(found);
                }
                for branch in decisions.values() {
                    if let Some(found) = find_task_def_name(branch, task_reference_name) {
                        return Some(found);
                    }
                }
            }
            _ => {}
        }
    }
    None
}
