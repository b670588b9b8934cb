// Agora Store - In-memory image of the durable tables
//
// The whole store state serializes to one JSON snapshot. The writer task
// owns mutation; everything here is plain data plus read helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use agora_core::{
    Agent, AgentStatus, Capability, EventRecord, Message, TaskAssignment, TaskStatus, Workflow,
    WorkflowStep,
};

/// Result of an idempotent write, replayed on identical retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    /// Operation the key was used with
    pub op: String,

    /// Exact parameters of the original request
    pub params: serde_json::Value,

    /// Result returned to the original caller
    pub result: serde_json::Value,

    /// Commit sequence of the original write
    pub commit_sequence: u64,
}

/// Every durable table of the coordination store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreState {
    /// Store-wide monotonic commit sequence; one increment per reducer
    pub commit_sequence: u64,

    /// Emergency-halt flag; only user reducers commit while set
    pub halted: bool,

    /// Agents by `agent_id`
    pub agents: HashMap<String, Agent>,

    /// Name lock index: `agent_name` -> `agent_id`
    pub agent_names: HashMap<String, String>,

    /// Capabilities by `capability_id`
    pub capabilities: HashMap<String, Capability>,

    /// Unique index: `{agent_id}:{capability_type}` -> `capability_id`
    pub capability_index: HashMap<String, String>,

    /// Messages by `message_id`
    pub messages: HashMap<String, Message>,

    /// Task assignments by `task_id`
    pub tasks: HashMap<String, TaskAssignment>,

    /// Workflows by `workflow_id`
    pub workflows: HashMap<String, Workflow>,

    /// Workflow steps by `step_id`
    pub steps: HashMap<String, WorkflowStep>,

    /// Per-recipient event records in commit order; pruned from the front
    /// by the retention sweeper
    pub events: Vec<EventRecord>,

    /// Next per-target delivery sequence
    pub target_sequences: HashMap<String, u64>,

    /// Durable subscriber cursors: agent -> last acknowledged sequence
    pub cursors: HashMap<String, u64>,

    /// Highest pruned sequence per target; cursors below this are expired
    pub pruned_through: HashMap<String, u64>,

    /// Idempotency results by caller-supplied key
    pub idempotency: HashMap<String, IdempotencyEntry>,
}

impl StoreState {
    /// Composite key for the `(agent_id, capability_type)` unique index
    pub fn capability_key(agent_id: &str, capability_type: &str) -> String {
        format!("{}:{}", agent_id, capability_type)
    }

    /// Look up an agent by its locked name
    pub fn agent_by_name(&self, name: &str) -> Option<&Agent> {
        self.agent_names
            .get(name)
            .and_then(|id| self.agents.get(id))
    }

    /// Look up a capability by owner and type
    pub fn capability_of(&self, agent_id: &str, capability_type: &str) -> Option<&Capability> {
        self.capability_index
            .get(&Self::capability_key(agent_id, capability_type))
            .and_then(|id| self.capabilities.get(id))
    }

    /// Agents eligible for broadcast delivery (any status except offline)
    pub fn reachable_agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents
            .values()
            .filter(|a| a.status != AgentStatus::Offline)
    }

    /// Agents currently active
    pub fn active_agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents
            .values()
            .filter(|a| a.status == AgentStatus::Active)
    }

    /// Number of live assignments an agent holds against one capability type
    pub fn in_flight_count(&self, agent_id: &str, capability_type: &str) -> u32 {
        self.tasks
            .values()
            .filter(|t| {
                t.assignee == agent_id
                    && t.task_type == capability_type
                    && !t.status.is_terminal()
            })
            .count() as u32
    }

    /// Allocate the next delivery sequence for a target
    pub fn next_sequence_for(&mut self, target: &str) -> u64 {
        let counter = self.target_sequences.entry(target.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Events addressed to one target with sequence strictly above `after`,
    /// in sequence order
    pub fn events_for(&self, target: &str, after: u64) -> Vec<EventRecord> {
        let mut out: Vec<EventRecord> = self
            .events
            .iter()
            .filter(|e| e.target_agent == target && e.sequence > after)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sequence);
        out
    }

    /// Whether a cursor for `target` has fallen behind the prune horizon
    pub fn cursor_expired(&self, target: &str, cursor: u64) -> bool {
        match self.pruned_through.get(target) {
            Some(&horizon) => cursor < horizon,
            None => false,
        }
    }

    /// Steps of a workflow in ordinal order
    pub fn workflow_steps(&self, workflow_id: &str) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self
            .steps
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .collect();
        steps.sort_by_key(|s| s.ordinal);
        steps
    }

    /// Aggregate workflow progress: mean of step progress, completed
    /// steps counting as 100
    pub fn workflow_progress(&self, workflow_id: &str) -> u8 {
        let steps = self.workflow_steps(workflow_id);
        if steps.is_empty() {
            return 0;
        }
        let total: u32 = steps
            .iter()
            .map(|s| match s.status {
                TaskStatus::Completed => 100u32,
                _ => s
                    .assigned_task_id
                    .as_deref()
                    .and_then(|id| self.tasks.get(id))
                    .map(|t| t.progress as u32)
                    .unwrap_or(0),
            })
            .sum();
        (total / steps.len() as u32) as u8
    }
}
