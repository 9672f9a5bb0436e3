//! Failure Strategy Handler (C5, §4.3).
//!
//! Two decisions live here: task-level retry (exhausting a single task's own
//! `retry` budget via `reload`, never touching the enclosing workflow), and
//! workflow-level strategy dispatch once a task's retries are exhausted and
//! [`crate::engine::traversal`] reports the workflow tree as
//! [`Failed`](crate::engine::traversal::Outcome::Failed). Both are pure: the
//! store I/O and bus effects they imply are carried out by
//! [`super::state`], which owns the async boundary.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::model::{RetryConfig, TaskInstance, TaskNode, TaskStatus, WorkflowInstance, WorkflowRef};
use crate::reliability::retry::{next_retry_delay, retries_remaining};

/// What to do about a single failed task instance.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRetryDecision {
    /// Reload the task with the same `taskReferenceName`, bumping `retries`,
    /// after `delay`.
    Reload { delay: Duration },
    /// No budget left; the failure propagates to the workflow.
    Exhausted,
}

/// A retry budget of `None` (no `TaskDefinition.retry` override) behaves as
/// [`RetryConfig::none`] — zero attempts, immediate exhaustion.
pub fn plan_task_retry(task_retry: Option<&RetryConfig>, task: &TaskInstance) -> TaskRetryDecision {
    let retry = task_retry.cloned().unwrap_or_else(RetryConfig::none);
    if retries_remaining(&retry, task.retries) {
        TaskRetryDecision::Reload {
            delay: next_retry_delay(&retry),
        }
    } else {
        TaskRetryDecision::Exhausted
    }
}

/// A single synthesized compensate task: the reference name/name pair to
/// schedule, plus the fixed input it carries (the original task's output —
/// §4.3 — not subject to reference resolution since the value is already
/// concrete).
#[derive(Debug, Clone, PartialEq)]
pub struct CompensateTask {
    pub task_reference_name: String,
    pub name: String,
    pub input: Value,
}

/// What the workflow-level failure strategy decides once task retries are
/// exhausted.
#[derive(Debug, Clone, PartialEq)]
pub enum FailurePlan {
    /// No recovery: the workflow and transaction go terminal `Failed`.
    Fail,
    /// Re-run the same definition and input as a fresh `RetryWorkflow`
    /// instance after `delay`.
    RetryWorkflow { delay: Duration },
    /// Run a reverse-order compensate sequence. `then_retry` marks whether a
    /// fresh `Workflow` instance (original definition/input) should follow
    /// once compensation completes (§4.3's `CompensateThenRetry`, scenario
    /// 6: the restarted instance is plain `type=Workflow`, not a distinct
    /// compensate-then-retry variant).
    Compensate {
        tasks: Vec<CompensateTask>,
        then_retry: bool,
    },
    /// Hand off to a separately defined recovery workflow; the caller
    /// resolves `WorkflowRef` against the store.
    RecoveryWorkflow(WorkflowRef),
}

/// Decide the workflow-level strategy for `workflow`, which has just failed
/// (task retries on the failing leaf are exhausted).
pub fn plan_workflow_failure(workflow: &WorkflowInstance, task_instances: &[TaskInstance]) -> FailurePlan {
    use crate::model::FailureStrategy::*;

    match workflow.definition.failure_strategy {
        Failed => FailurePlan::Fail,
        Retry => {
            let retry = workflow.definition.retry.clone().unwrap_or_else(RetryConfig::none);
            if retries_remaining(&retry, workflow.retries) {
                FailurePlan::RetryWorkflow {
                    delay: next_retry_delay(&retry),
                }
            } else {
                FailurePlan::Fail
            }
        }
        Compensate => FailurePlan::Compensate {
            tasks: compensate_tasks(workflow, task_instances),
            then_retry: false,
        },
        CompensateThenRetry => FailurePlan::Compensate {
            tasks: compensate_tasks(workflow, task_instances),
            then_retry: true,
        },
        RecoveryWorkflow => match &workflow.definition.recovery_workflow {
            Some(target) => FailurePlan::RecoveryWorkflow(target.clone()),
            // Validated definitions never reach this arm (C1 requires
            // `recoveryWorkflow` whenever this strategy is chosen).
            None => FailurePlan::Fail,
        },
    }
}

/// Reverse-order list of compensate tasks over the workflow's previously
/// `Completed` leaf tasks, descending into `Parallel` lanes and the chosen
/// `Decision` branch, skipping tasks that never completed. `SubWorkflow`
/// nodes are not compensated by this engine (compensating a sub-workflow is
/// the sub-workflow's own concern).
fn compensate_tasks(workflow: &WorkflowInstance, task_instances: &[TaskInstance]) -> Vec<CompensateTask> {
    let by_ref: HashMap<&str, &TaskInstance> = task_instances
        .iter()
        .map(|t| (t.task_reference_name.as_str(), t))
        .collect();

    let mut completed = Vec::new();
    collect_completed_leaves(&workflow.definition.tasks, &by_ref, &mut completed);
    completed.reverse();

    completed
        .into_iter()
        .map(|(node, instance)| {
            let name = match node {
                TaskNode::Task { name, .. } => name.clone(),
                _ => unreachable!("collect_completed_leaves only yields Task nodes"),
            };
            CompensateTask {
                task_reference_name: instance.task_reference_name.clone(),
                name,
                input: instance.output.clone().unwrap_or(Value::Null),
            }
        })
        .collect()
}

fn collect_completed_leaves<'a>(
    nodes: &'a [TaskNode],
    by_ref: &HashMap<&str, &'a TaskInstance>,
    out: &mut Vec<(&'a TaskNode, &'a TaskInstance)>,
) {
    for node in nodes {
        match node {
            TaskNode::Task {
                task_reference_name, ..
            } => {
                if let Some(instance) = by_ref.get(task_reference_name.as_str()) {
                    if instance.status == TaskStatus::Completed {
                        out.push((node, instance));
                    }
                }
            }
            TaskNode::Parallel { lanes, .. } => {
                for lane in lanes {
                    collect_completed_leaves(lane, by_ref, out);
                }
            }
            TaskNode::Decision {
                task_reference_name,
                decisions,
                default_decision,
                ..
            } => {
                if let Some(instance) = by_ref.get(task_reference_name.as_str()) {
                    if let crate::model::TaskChildren::Decision { chosen, .. } = &instance.children {
                        let branch = chosen.as_deref().and_then(|k| decisions.get(k)).unwrap_or(default_decision);
                        collect_completed_leaves(branch, by_ref, out);
                    }
                }
            }
            TaskNode::SubWorkflow { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        FailureStrategy, TaskChildren, TaskInstanceType, TaskStatus, WorkflowDefinition, WorkflowInstanceType,
    };
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn leaf(name: &str) -> TaskNode {
        TaskNode::Task {
            task_reference_name: name.to_string(),
            name: name.to_string(),
        }
    }

    fn workflow(tasks: Vec<TaskNode>, strategy: FailureStrategy) -> WorkflowInstance {
        let def = WorkflowDefinition {
            name: "wf".into(),
            rev: "1".into(),
            tasks,
            failure_strategy: strategy,
            retry: None,
            recovery_workflow: None,
            output_parameters: None,
        };
        WorkflowInstance::new(
            Uuid::now_v7(),
            "tx-1",
            WorkflowInstanceType::Workflow,
            def,
            serde_json::json!({}),
        )
    }

    fn completed_task(workflow_id: Uuid, ref_name: &str, output: Value) -> TaskInstance {
        TaskInstance {
            task_id: Uuid::now_v7(),
            workflow_id,
            transaction_id: "tx-1".into(),
            r#type: TaskInstanceType::Task,
            task_reference_name: ref_name.into(),
            status: TaskStatus::Completed,
            input: serde_json::json!({}),
            output: Some(output),
            retries: 0,
            is_retried: false,
            retry_delay: StdDuration::ZERO,
            start_time: chrono::Utc::now(),
            end_time: Some(chrono::Utc::now()),
            logs: None,
            children: TaskChildren::None,
        }
    }

    #[test]
    fn failed_strategy_never_recovers() {
        let wf = workflow(vec![leaf("t1")], FailureStrategy::Failed);
        assert_eq!(plan_workflow_failure(&wf, &[]), FailurePlan::Fail);
    }

    #[test]
    fn retry_strategy_retries_until_the_limit() {
        let mut wf = workflow(vec![leaf("t1")], FailureStrategy::Retry);
        wf.definition.retry = Some(RetryConfig { limit: 1, delay_second: 0 });
        assert!(matches!(
            plan_workflow_failure(&wf, &[]),
            FailurePlan::RetryWorkflow { .. }
        ));

        wf.retries = 1;
        assert_eq!(plan_workflow_failure(&wf, &[]), FailurePlan::Fail);
    }

    #[test]
    fn compensate_synthesizes_reverse_order_tasks_over_completed_work_only() {
        let wf = workflow(
            vec![leaf("t1"), leaf("t2"), leaf("t3")],
            FailureStrategy::Compensate,
        );
        let rows = vec![
            completed_task(wf.workflow_id, "t1", serde_json::json!({"id": 1})),
            completed_task(wf.workflow_id, "t2", serde_json::json!({"id": 2})),
            // t3 never completed (it's the one that failed) and is absent.
        ];

        match plan_workflow_failure(&wf, &rows) {
            FailurePlan::Compensate { tasks, then_retry } => {
                assert!(!then_retry);
                let names: Vec<_> = tasks.iter().map(|t| t.task_reference_name.as_str()).collect();
                assert_eq!(names, vec!["t2", "t1"]);
                assert_eq!(tasks[0].input, serde_json::json!({"id": 2}));
            }
            other => panic!("expected Compensate, got {other:?}"),
        }
    }

    #[test]
    fn compensate_then_retry_is_tagged_for_a_follow_up_restart() {
        let wf = workflow(vec![leaf("t1")], FailureStrategy::CompensateThenRetry);
        let rows = vec![completed_task(wf.workflow_id, "t1", serde_json::json!(null))];
        match plan_workflow_failure(&wf, &rows) {
            FailurePlan::Compensate { then_retry, .. } => assert!(then_retry),
            other => panic!("expected Compensate, got {other:?}"),
        }
    }

    #[test]
    fn zero_completed_tasks_compensates_to_an_empty_sequence() {
        let wf = workflow(vec![leaf("t1")], FailureStrategy::Compensate);
        match plan_workflow_failure(&wf, &[]) {
            FailurePlan::Compensate { tasks, .. } => assert!(tasks.is_empty()),
            other => panic!("expected Compensate, got {other:?}"),
        }
    }

    #[test]
    fn recovery_workflow_strategy_points_at_the_configured_definition() {
        let mut wf = workflow(vec![leaf("t1")], FailureStrategy::RecoveryWorkflow);
        wf.definition.recovery_workflow = Some(WorkflowRef::new("recover", "1"));
        assert_eq!(
            plan_workflow_failure(&wf, &[]),
            FailurePlan::RecoveryWorkflow(WorkflowRef::new("recover", "1"))
        );
    }

    #[test]
    fn task_retry_with_zero_limit_is_exhausted_immediately() {
        let task = completed_task(Uuid::now_v7(), "t1", Value::Null);
        let retry = RetryConfig { limit: 0, delay_second: 0 };
        assert_eq!(plan_task_retry(Some(&retry), &task), TaskRetryDecision::Exhausted);
    }

    #[test]
    fn task_retry_without_a_configured_budget_is_exhausted_immediately() {
        let task = completed_task(Uuid::now_v7(), "t1", Value::Null);
        assert_eq!(plan_task_retry(None, &task), TaskRetryDecision::Exhausted);
    }
}
