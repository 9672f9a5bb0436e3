//! Workflow and task definitions.
//!
//! A [`WorkflowDefinition`] is a read-only value once created: bumping `rev`
//! produces a new definition rather than mutating an existing one. Instances
//! (see [`super::instance`]) carry their own owned snapshot of the effective
//! definition so traversal never has to re-read the registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A non-negative retry budget attached to a workflow or task definition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub limit: u32,
    pub delay_second: u64,
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            limit: 0,
            delay_second: 0,
        }
    }
}

/// `(name, rev)` pointer to another workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub name: String,
    pub rev: String,
}

impl WorkflowRef {
    pub fn new(name: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rev: rev.into(),
        }
    }
}

/// What to do once a workflow instance's failure has exhausted task-level
/// retries (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureStrategy {
    Failed,
    Retry,
    Compensate,
    CompensateThenRetry,
    RecoveryWorkflow,
}

/// A standalone task definition, identified by `name` and referenced from one
/// or more `Task` nodes across one or more workflow definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub retry: Option<RetryConfig>,
    pub timeout_second: Option<u64>,
    pub ack_timeout_second: Option<u64>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry: None,
            timeout_second: None,
            ack_timeout_second: None,
        }
    }
}

/// A node in a workflow definition's task tree.
///
/// Sum-typed by `type` rather than modeled as a shared mutable base record so
/// each variant carries only the payload it needs (§9 Design Notes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskNode {
    Task {
        task_reference_name: String,
        name: String,
    },
    /// A list of independent lanes; each lane is itself a sequence of nodes.
    Parallel {
        task_reference_name: String,
        lanes: Vec<Vec<TaskNode>>,
    },
    /// A runtime-resolved branch selector plus a mandatory default branch.
    Decision {
        task_reference_name: String,
        /// Reference expression (§4.4) resolved against the workflow context
        /// to pick a key into `decisions`.
        expression: String,
        decisions: HashMap<String, Vec<TaskNode>>,
        default_decision: Vec<TaskNode>,
    },
    SubWorkflow {
        task_reference_name: String,
        workflow: WorkflowRef,
    },
}

impl TaskNode {
    pub fn task_reference_name(&self) -> &str {
        match self {
            TaskNode::Task {
                task_reference_name,
                ..
            }
            | TaskNode::Parallel {
                task_reference_name,
                ..
            }
            | TaskNode::Decision {
                task_reference_name,
                ..
            }
            | TaskNode::SubWorkflow {
                task_reference_name,
                ..
            } => task_reference_name,
        }
    }
}

/// A workflow definition, identified by `(name, rev)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub rev: String,
    pub tasks: Vec<TaskNode>,
    pub failure_strategy: FailureStrategy,
    pub retry: Option<RetryConfig>,
    pub recovery_workflow: Option<WorkflowRef>,
    /// `${ref.path}` substitutions resolved once the workflow instance
    /// terminates successfully (§4.4).
    pub output_parameters: Option<HashMap<String, String>>,
}

impl WorkflowDefinition {
    pub fn workflow_ref(&self) -> WorkflowRef {
        WorkflowRef::new(self.name.clone(), self.rev.clone())
    }
}
