//! Instance Traversal (C3, §4.2/§4.3 edge cases): the pure function that maps
//! a workflow definition's task tree plus its current [`TaskInstance`] rows
//! to "what happens next."
//!
//! Recomputed from history on every call rather than advanced through a
//! serialized cursor (§9 Design Notes): a [`TaskInstance`] row's presence and
//! status for a given `taskReferenceName` is the only state this module
//! reads, so replaying the same rows always yields the same [`Outcome`].
//! Container nodes (`Parallel`/`Decision`/`SubWorkflow`) get their own row —
//! created once, by C7, when the container is first entered — but a
//! container's own row is a marker only; its completion is derived by
//! recursing into lanes/branches/the child workflow rather than read off the
//! row's own status, except where noted below.

use std::collections::HashMap;

use crate::model::{TaskChildren, TaskInstance, TaskNode, TaskStatus, WorkflowInstance};

/// Result of evaluating a node or a sibling sequence of nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// These nodes have no instance yet and are ready to be scheduled. More
    /// than one entry only ever comes from sibling `Parallel` lanes starting
    /// concurrently.
    Schedule(Vec<TaskNode>),
    /// Work is in flight; nothing new to schedule and nothing to report yet.
    InProgress,
    /// Every node in the sequence reached `Completed`.
    Complete,
    /// A node terminally failed without being retried; carries its
    /// `taskReferenceName` for failure-strategy dispatch (C5).
    Failed(String),
}

/// Evaluate a whole workflow instance against its current task rows.
pub fn evaluate(instance: &WorkflowInstance, task_instances: &[TaskInstance]) -> Outcome {
    let by_ref: HashMap<&str, &TaskInstance> = task_instances
        .iter()
        .map(|t| (t.task_reference_name.as_str(), t))
        .collect();
    evaluate_sequence(&instance.definition.tasks, &by_ref)
}

fn evaluate_sequence(nodes: &[TaskNode], by_ref: &HashMap<&str, &TaskInstance>) -> Outcome {
    for node in nodes {
        match evaluate_node(node, by_ref) {
            Outcome::Complete => continue,
            other => return other,
        }
    }
    Outcome::Complete
}

fn evaluate_node(node: &TaskNode, by_ref: &HashMap<&str, &TaskInstance>) -> Outcome {
    let ref_name = node.task_reference_name();
    let Some(instance) = by_ref.get(ref_name) else {
        return Outcome::Schedule(vec![node.clone()]);
    };

    match node {
        TaskNode::Task { .. } => leaf_outcome(instance),
        TaskNode::SubWorkflow { .. } => leaf_outcome(instance),
        TaskNode::Decision {
            decisions,
            default_decision,
            ..
        } => evaluate_decision(instance, decisions, default_decision, by_ref),
        TaskNode::Parallel { lanes, .. } => evaluate_parallel(lanes, by_ref),
    }
}

fn leaf_outcome(instance: &TaskInstance) -> Outcome {
    match instance.status {
        TaskStatus::Completed => Outcome::Complete,
        TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::AckTimeOut => {
            Outcome::Failed(instance.task_reference_name.clone())
        }
        TaskStatus::Scheduled | TaskStatus::Inprogress => Outcome::InProgress,
    }
}

fn evaluate_decision(
    instance: &TaskInstance,
    decisions: &HashMap<String, Vec<TaskNode>>,
    default_decision: &[TaskNode],
    by_ref: &HashMap<&str, &TaskInstance>,
) -> Outcome {
    match instance.status {
        TaskStatus::Completed => {
            let chosen = match &instance.children {
                TaskChildren::Decision { chosen, .. } => chosen.as_deref(),
                _ => None,
            };
            let branch = chosen.and_then(|key| decisions.get(key)).unwrap_or(default_decision);
            evaluate_sequence(branch, by_ref)
        }
        TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::AckTimeOut => {
            Outcome::Failed(instance.task_reference_name.clone())
        }
        TaskStatus::Scheduled | TaskStatus::Inprogress => Outcome::InProgress,
    }
}

/// A zero-lane `Parallel` completes immediately (§11); lanes otherwise
/// evaluate independently and fail-fast: the first lane to fail ends the
/// whole node even if sibling lanes are still in flight.
fn evaluate_parallel(lanes: &[Vec<TaskNode>], by_ref: &HashMap<&str, &TaskInstance>) -> Outcome {
    if lanes.is_empty() {
        return Outcome::Complete;
    }

    let mut all_complete = true;
    let mut schedule = Vec::new();
    for lane in lanes {
        match evaluate_sequence(lane, by_ref) {
            Outcome::Complete => {}
            Outcome::Schedule(mut nodes) => {
                all_complete = false;
                schedule.append(&mut nodes);
            }
            Outcome::InProgress => all_complete = false,
            failed @ Outcome::Failed(_) => return failed,
        }
    }

    if all_complete {
        Outcome::Complete
    } else if !schedule.is_empty() {
        Outcome::Schedule(schedule)
    } else {
        Outcome::InProgress
    }
}
