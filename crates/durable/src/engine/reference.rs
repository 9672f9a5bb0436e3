//! Reference Expression Resolution (C4.4, §4.4).
//!
//! `${expr}` is a dotted-path lookup rooted at `workflow.input`,
//! `workflow.output`, or `<taskReferenceName>.(input|output)` — never a
//! general expression evaluator. Resolved once, at task-instance creation
//! time, against a context assembled from the transaction's current
//! workflow/task instances.

use std::collections::HashMap;

use serde_json::Value;

/// `{root}.{path...}` split out of a single `${...}` expression.
struct ParsedRef<'a> {
    root: &'a str,
    path: Vec<&'a str>,
}

fn parse_ref(expr: &str) -> Option<ParsedRef<'_>> {
    let inner = expr.strip_prefix("${")?.strip_suffix('}')?;
    let mut parts = inner.split('.');
    let root = parts.next()?;
    Some(ParsedRef {
        root,
        path: parts.collect(),
    })
}

/// Context a single expression resolves against: `workflow.input` /
/// `workflow.output`, plus `input`/`output` for every task reference name
/// seen so far in the transaction.
#[derive(Debug, Default, Clone)]
pub struct ReferenceContext {
    workflow_input: Value,
    workflow_output: Option<Value>,
    tasks: HashMap<String, TaskContext>,
}

#[derive(Debug, Default, Clone)]
struct TaskContext {
    input: Value,
    output: Option<Value>,
}

impl ReferenceContext {
    pub fn new(workflow_input: Value) -> Self {
        Self {
            workflow_input,
            workflow_output: None,
            tasks: HashMap::new(),
        }
    }

    pub fn set_workflow_output(&mut self, output: Value) {
        self.workflow_output = Some(output);
    }

    pub fn record_task(&mut self, task_reference_name: impl Into<String>, input: Value, output: Option<Value>) {
        self.tasks.insert(task_reference_name.into(), TaskContext { input, output });
    }

    fn resolve_one(&self, expr: &str) -> Option<&Value> {
        let parsed = parse_ref(expr)?;
        let (head, rest) = parsed.path.split_first()?;

        let base = if parsed.root == "workflow" {
            match *head {
                "input" => &self.workflow_input,
                "output" => self.workflow_output.as_ref()?,
                _ => return None,
            }
        } else {
            let task = self.tasks.get(parsed.root)?;
            match *head {
                "input" => &task.input,
                "output" => task.output.as_ref()?,
                _ => return None,
            }
        };
        walk(base, rest)
    }
}

fn walk<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Whether `s` is exactly one `${...}` expression and nothing else, in which
/// case the resolved value keeps its original JSON type instead of being
/// stringified (§4.4).
fn is_whole_string_expression(s: &str) -> bool {
    s.starts_with("${") && s.ends_with('}') && s.matches("${").count() == 1
}

/// Resolve every `${...}` occurrence in `value`, recursively.
///
/// A string that is *entirely* one expression resolves to the referenced
/// value's own JSON type (object, array, number, ...); unresolved, it becomes
/// `null`. A string with embedded expressions (`"prefix-${x}-suffix"`) always
/// stringifies and concatenates; an unresolved embedded expression
/// contributes an empty string.
pub fn resolve(value: &Value, ctx: &ReferenceContext) -> Value {
    match value {
        Value::String(s) if s.contains("${") => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve(v, ctx))).collect()),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &ReferenceContext) -> Value {
    if is_whole_string_expression(s) {
        return ctx.resolve_one(s).cloned().unwrap_or(Value::Null);
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find('}') else {
            out.push_str(after);
            rest = "";
            break;
        };
        let expr = &after[..=end];
        match ctx.resolve_one(expr) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => {}
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}
