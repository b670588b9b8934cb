// Agora Runtime - Tool server operation parameters
//
// One serde struct per operation. Unknown fields are rejected so a typo
// on the caller side fails loudly instead of being silently ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_core::{AgentRole, AgoraError, AgoraResult, CapabilitySpec, ServiceTier, TaskStatus};

/// `agora.messaging.send`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendParams {
    /// Recipient agent id, or `*` for broadcast
    pub to_agent: String,

    pub message_type: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// `agora.task.assign`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignParams {
    pub assignee: String,

    pub task_type: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// `agora.task.update`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateParams {
    pub task_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// `agora.agent.register`
///
/// The agent name comes from the verified identity claims, not from the
/// parameters; `agent_type` is a free-form label echoed back in the
/// registration event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterParams {
    pub agent_type: String,

    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,

    /// Optional `role` and `tier` keys are honored; everything else is
    /// opaque
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RegisterParams {
    /// Role requested through metadata; defaults to worker
    pub fn requested_role(&self) -> AgoraResult<AgentRole> {
        match self.metadata.as_ref().and_then(|m| m.get("role")) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                AgoraError::invalid_argument(format!("unknown role {}", value))
            }),
            None => Ok(AgentRole::Worker),
        }
    }

    /// Service tier requested through metadata; defaults to basic
    pub fn requested_tier(&self) -> AgoraResult<ServiceTier> {
        match self.metadata.as_ref().and_then(|m| m.get("tier")) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                AgoraError::invalid_argument(format!("unknown tier {}", value))
            }),
            None => Ok(ServiceTier::Basic),
        }
    }
}

/// `agora.workflow.start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowStartParams {
    pub workflow_name: String,

    pub steps: Vec<agora_core::StepSpec>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// `agora.query.data`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDataParams {
    pub entity: String,

    #[serde(default)]
    pub filter: serde_json::Map<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Deserialize operation parameters, mapping serde failures to
/// `InvalidArgument`
pub fn parse<T: serde::de::DeserializeOwned>(params: &serde_json::Value) -> AgoraResult<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| AgoraError::invalid_argument(format!("malformed parameters: {}", e)))
}
