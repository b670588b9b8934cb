// Agora Core - Workflows and steps
//
// A workflow is a named, ordered set of steps with dependencies; each step
// maps to at most one task assignment at a time. Step status mirrors the
// task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::task::TaskStatus;

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// Forced by an emergency halt
    Halted,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A multi-step unit of orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique opaque identifier (`wf_{16 hex}`)
    pub workflow_id: String,

    pub workflow_name: String,

    /// Agent that started the workflow
    pub initiator_agent: String,

    pub status: WorkflowStatus,

    /// Step identifiers in declaration order
    pub steps: Vec<String>,

    /// Opaque metadata supplied at start
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single step within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique opaque identifier (`step_{16 hex}`)
    pub step_id: String,

    pub workflow_id: String,

    /// Position in declaration order
    pub ordinal: u32,

    /// Unique within the workflow
    pub name: String,

    /// Capability type an assignee must hold
    pub required_capability: String,

    /// Task currently bound to this step, if scheduled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_task_id: Option<String>,

    /// Mirrors the bound task's status
    pub status: TaskStatus,

    /// Step identifiers that must complete before this step is ready
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Step payload forwarded into the task assignment
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Retry attempts consumed so far
    #[serde(default)]
    pub retry_count: u32,

    /// Earliest instant the next retry may be scheduled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Step declaration supplied to `agora.workflow.start`.
///
/// Dependencies are declared by step *name* and resolved to step
/// identifiers when the workflow is inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the workflow
    pub name: String,

    /// Capability type an assignee must hold
    pub required_capability: String,

    /// Names of steps that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Opaque payload forwarded into the task assignment
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Validate a workflow's step declarations: unique names, known
/// dependencies, and an acyclic dependency graph.
pub fn validate_step_dag(steps: &[StepSpec]) -> Result<(), String> {
    if steps.is_empty() {
        return Err("workflow must declare at least one step".to_string());
    }

    let mut names = HashSet::new();
    for step in steps {
        if step.name.trim().is_empty() {
            return Err("step name must not be empty".to_string());
        }
        if !names.insert(step.name.as_str()) {
            return Err(format!("duplicate step name '{}'", step.name));
        }
    }

    for step in steps {
        for dep in &step.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dep
                ));
            }
            if dep == &step.name {
                return Err(format!("step '{}' depends on itself", step.name));
            }
        }
    }

    // Kahn's algorithm over the name graph
    let mut in_degree: HashMap<&str, usize> = steps
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in &step.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.name.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut visited = 0;
    while let Some(name) = ready.pop() {
        visited += 1;
        if let Some(deps) = dependents.get(name) {
            for dependent in deps {
                let degree = in_degree.get_mut(dependent).expect("known step");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }
    }

    if visited != steps.len() {
        return Err("step dependencies contain a cycle".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: &[&str]) -> StepSpec {
        StepSpec {
            name: name.to_string(),
            required_capability: "build".to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_valid_dag() {
        let steps = vec![step("build", &[]), step("test", &["build"])];
        assert!(validate_step_dag(&steps).is_ok());
    }

    #[test]
    fn test_empty_workflow_rejected() {
        assert!(validate_step_dag(&[]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let steps = vec![step("build", &[]), step("build", &[])];
        assert!(validate_step_dag(&steps).is_err());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let steps = vec![step("test", &["build"])];
        assert!(validate_step_dag(&steps).is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let steps = vec![
            step("a", &["c"]),
            step("b", &["a"]),
            step("c", &["b"]),
        ];
        assert!(validate_step_dag(&steps).is_err());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let steps = vec![step("a", &["a"])];
        assert!(validate_step_dag(&steps).is_err());
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let steps = vec![
            step("fetch", &[]),
            step("lint", &["fetch"]),
            step("build", &["fetch"]),
            step("ship", &["lint", "build"]),
        ];
        assert!(validate_step_dag(&steps).is_ok());
    }
}
