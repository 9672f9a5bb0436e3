//! System-Task Executor (C7, §4.7).
//!
//! Runs in-process on a freshly `Scheduled` system-task instance
//! (`Decision`, `Parallel`, `SubWorkflow`, `Schedule`). Never dispatches to
//! an external worker; instead it computes the task's own outcome and hands
//! it back to [`super::engine::state`], which folds it into the same
//! `apply` path an externally-sourced update would take.

use serde_json::Value;

use crate::engine::reference::{self, ReferenceContext};
use crate::model::{TaskChildren, TaskNode};

/// What a system task decided, expressed as the pieces `state::apply` needs
/// to finish the update: an output value and, where relevant, an updated
/// [`TaskChildren`] snapshot recording the decision made.
pub struct SystemOutcome {
    pub output: Value,
    pub children: TaskChildren,
}

/// Evaluate a `Decision` node's expression against the accumulated workflow
/// context and select a branch. An expression that resolves to a key absent
/// from `decisions` falls back to `defaultDecision` (§4.2, boundary
/// behaviour: "a Decision whose resolved key is absent uses
/// `defaultDecision`").
pub fn evaluate_decision(node: &TaskNode, ctx: &ReferenceContext) -> SystemOutcome {
    let TaskNode::Decision {
        expression,
        decisions,
        default_decision,
        ..
    } = node
    else {
        panic!("evaluate_decision called on a non-Decision node");
    };

    let resolved = reference::resolve(&Value::String(expression.clone()), ctx);
    let key = match &resolved {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let chosen = if decisions.contains_key(&key) { Some(key) } else { None };

    SystemOutcome {
        output: Value::String(chosen.clone().unwrap_or_default()),
        children: TaskChildren::Decision {
            expression: expression.clone(),
            decisions: decisions.clone(),
            default_decision: default_decision.clone(),
            chosen,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn leaf(name: &str) -> TaskNode {
        TaskNode::Task {
            task_reference_name: name.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn resolves_a_matching_branch_key() {
        let node = TaskNode::Decision {
            task_reference_name: "d1".into(),
            expression: "${workflow.input.kind}".into(),
            decisions: HashMap::from([("express".to_string(), vec![leaf("ship_express")])]),
            default_decision: vec![leaf("ship_standard")],
        };
        let ctx = ReferenceContext::new(json!({"kind": "express"}));
        let outcome = evaluate_decision(&node, &ctx);
        assert_eq!(outcome.output, json!("express"));
        match outcome.children {
            TaskChildren::Decision { chosen, .. } => assert_eq!(chosen.as_deref(), Some("express")),
            _ => panic!("expected Decision children"),
        }
    }

    #[test]
    fn falls_back_to_the_default_branch_for_an_unmatched_key() {
        let node = TaskNode::Decision {
            task_reference_name: "d1".into(),
            expression: "${workflow.input.kind}".into(),
            decisions: HashMap::from([("express".to_string(), vec![leaf("ship_express")])]),
            default_decision: vec![leaf("ship_standard")],
        };
        let ctx = ReferenceContext::new(json!({"kind": "overnight"}));
        let outcome = evaluate_decision(&node, &ctx);
        match outcome.children {
            TaskChildren::Decision { chosen, .. } => assert_eq!(chosen, None),
            _ => panic!("expected Decision children"),
        }
    }
}
