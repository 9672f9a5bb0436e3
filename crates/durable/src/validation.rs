//! Definition Validator (C1).
//!
//! A structural guard on every incoming [`WorkflowDefinition`]: pure, total,
//! and independent of the task-definition registry (which may be eventually
//! consistent, per §4.1). Collects every violation rather than failing on the
//! first one, each tagged with a path like
//! `workflowDefinition.tasks[3].decisions["foo"].tasks[1].name`.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{FailureStrategy, TaskNode, WorkflowDefinition};

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,127}$").unwrap());
static REV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").unwrap());

fn is_valid_name(s: &str) -> bool {
    NAME_RE.is_match(s)
}

fn is_valid_rev(s: &str) -> bool {
    REV_RE.is_match(s)
}

/// A single path-qualified validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validates a [`WorkflowDefinition`], returning every violation found.
///
/// Does not check referential integrity against the task-definition
/// registry; callers that need that guarantee resolve `TaskDefinition`s
/// separately.
pub fn validate(def: &WorkflowDefinition) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_valid_name(&def.name) {
        errors.push(ValidationError::new("workflowDefinition.name", "invalid name"));
    }
    if !is_valid_rev(&def.rev) {
        errors.push(ValidationError::new("workflowDefinition.rev", "invalid revision"));
    }

    match def.failure_strategy {
        FailureStrategy::RecoveryWorkflow => match &def.recovery_workflow {
            None => errors.push(ValidationError::new(
                "workflowDefinition.recoveryWorkflow",
                "required when failureStrategy is RecoveryWorkflow",
            )),
            Some(wf) => {
                if !is_valid_name(&wf.name) {
                    errors.push(ValidationError::new(
                        "workflowDefinition.recoveryWorkflow.name",
                        "invalid name",
                    ));
                }
                if !is_valid_rev(&wf.rev) {
                    errors.push(ValidationError::new(
                        "workflowDefinition.recoveryWorkflow.rev",
                        "invalid revision",
                    ));
                }
            }
        },
        FailureStrategy::Retry => match &def.retry {
            None => errors.push(ValidationError::new(
                "workflowDefinition.retry",
                "required when failureStrategy is Retry",
            )),
            Some(_) => {} // limit/delaySecond are u32/u64, non-negative by construction
        },
        FailureStrategy::Failed | FailureStrategy::Compensate | FailureStrategy::CompensateThenRetry => {}
    }

    if def.tasks.is_empty() {
        errors.push(ValidationError::new("workflowDefinition.tasks", "must be non-empty"));
    }

    let mut seen_ref_names: HashSet<String> = HashSet::new();
    for (i, task) in def.tasks.iter().enumerate() {
        validate_node(task, &format!("workflowDefinition.tasks[{i}]"), &mut seen_ref_names, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_node(
    node: &TaskNode,
    path: &str,
    seen_ref_names: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    let ref_name = node.task_reference_name();
    if !is_valid_name(ref_name) {
        errors.push(ValidationError::new(format!("{path}.taskReferenceName"), "invalid name"));
    } else if !seen_ref_names.insert(ref_name.to_string()) {
        errors.push(ValidationError::new(
            format!("{path}.taskReferenceName"),
            format!("duplicate taskReferenceName '{ref_name}' in definition"),
        ));
    }

    match node {
        TaskNode::Task { name, .. } => {
            if !is_valid_name(name) {
                errors.push(ValidationError::new(format!("{path}.name"), "invalid name"));
            }
        }
        TaskNode::Parallel { lanes, .. } => {
            for (li, lane) in lanes.iter().enumerate() {
                for (ti, t) in lane.iter().enumerate() {
                    validate_node(
                        t,
                        &format!("{path}.lanes[{li}].tasks[{ti}]"),
                        seen_ref_names,
                        errors,
                    );
                }
            }
        }
        TaskNode::Decision {
            decisions,
            default_decision,
            ..
        } => {
            if default_decision.is_empty() {
                errors.push(ValidationError::new(
                    format!("{path}.defaultDecision"),
                    "must be non-empty",
                ));
            }
            for (ti, t) in default_decision.iter().enumerate() {
                validate_node(t, &format!("{path}.defaultDecision[{ti}]"), seen_ref_names, errors);
            }
            for (key, branch) in decisions {
                for (ti, t) in branch.iter().enumerate() {
                    validate_node(
                        t,
                        &format!("{path}.decisions[\"{key}\"].tasks[{ti}]"),
                        seen_ref_names,
                        errors,
                    );
                }
            }
        }
        TaskNode::SubWorkflow { workflow, .. } => {
            if !is_valid_name(&workflow.name) {
                errors.push(ValidationError::new(format!("{path}.workflow.name"), "invalid name"));
            }
            if !is_valid_rev(&workflow.rev) {
                errors.push(ValidationError::new(format!("{path}.workflow.rev"), "invalid revision"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RetryConfig, TaskNode, WorkflowRef};
    use std::collections::HashMap;

    fn leaf(name: &str) -> TaskNode {
        TaskNode::Task {
            task_reference_name: name.to_string(),
            name: name.to_string(),
        }
    }

    fn base_def() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "order-workflow".into(),
            rev: "1".into(),
            tasks: vec![leaf("t1")],
            failure_strategy: FailureStrategy::Failed,
            retry: None,
            recovery_workflow: None,
            output_parameters: None,
        }
    }

    #[test]
    fn accepts_a_minimal_valid_definition() {
        assert!(validate(&base_def()).is_ok());
    }

    #[test]
    fn rejects_empty_tasks() {
        let mut def = base_def();
        def.tasks.clear();
        let errors = validate(&def).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "workflowDefinition.tasks"));
    }

    #[test]
    fn rejects_duplicate_task_reference_names_across_branches() {
        let mut def = base_def();
        def.tasks.push(TaskNode::Decision {
            task_reference_name: "d1".into(),
            expression: "${workflow.input.kind}".into(),
            decisions: HashMap::from([("a".to_string(), vec![leaf("t1")])]),
            default_decision: vec![leaf("t2")],
        });
        let errors = validate(&def).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("duplicate taskReferenceName 't1'")));
    }

    #[test]
    fn rejects_empty_default_decision() {
        let mut def = base_def();
        def.tasks.push(TaskNode::Decision {
            task_reference_name: "d1".into(),
            expression: "${workflow.input.kind}".into(),
            decisions: HashMap::new(),
            default_decision: vec![],
        });
        let errors = validate(&def).unwrap_err();
        assert!(errors.iter().any(|e| e.path.ends_with("defaultDecision")));
    }

    #[test]
    fn recovery_workflow_strategy_requires_recovery_workflow_ref() {
        let mut def = base_def();
        def.failure_strategy = FailureStrategy::RecoveryWorkflow;
        let errors = validate(&def).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.path == "workflowDefinition.recoveryWorkflow"));

        def.recovery_workflow = Some(WorkflowRef::new("recover", "1"));
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn retry_strategy_requires_retry_config() {
        let mut def = base_def();
        def.failure_strategy = FailureStrategy::Retry;
        let errors = validate(&def).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "workflowDefinition.retry"));

        def.retry = Some(RetryConfig { limit: 3, delay_second: 0 });
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn invalid_name_is_reported_with_a_qualified_path() {
        let mut def = base_def();
        def.name = "".into();
        let errors = validate(&def).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "workflowDefinition.name"));
    }
}
