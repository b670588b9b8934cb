// Agora Core - Events delivered on the fabric

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of state-change notifications emitted by reducers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentRegistered,
    CapabilityUpdated,
    MessageSent,
    TaskAssigned,
    TaskUpdated,
    WorkflowStarted,
    WorkflowProgress,
    WorkflowCompleted,
    WorkflowFailed,
    UserOverride,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentRegistered => "agent_registered",
            Self::CapabilityUpdated => "capability_updated",
            Self::MessageSent => "message_sent",
            Self::TaskAssigned => "task_assigned",
            Self::TaskUpdated => "task_updated",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowProgress => "workflow_progress",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::UserOverride => "user_override",
        }
    }
}

/// A durable, per-recipient event record.
///
/// Broadcasts are expanded into one record per recipient at reducer commit
/// time; the records share `event_id` but each carries its recipient's own
/// `sequence`. Records are never deleted, only pruned by the retention
/// sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Opaque identifier (`evt_{16 hex}`); shared across the recipients of
    /// a broadcast
    pub event_id: String,

    pub event_type: EventType,

    /// Agent (or user principal) whose operation produced the event
    pub source_agent: String,

    /// Recipient agent
    pub target_agent: String,

    /// Strictly increasing per `target_agent`
    pub sequence: u64,

    /// Store-wide commit sequence of the producing reducer
    pub commit_sequence: u64,

    /// 1..=5; inherited from the triggering message or operation.
    /// Priority 5 events are never dropped by the fabric.
    pub priority: u8,

    pub created_at: DateTime<Utc>,

    /// Typed payload block; shape is determined by `event_type`
    pub payload: serde_json::Value,

    /// Whether a cursor commit from the recipient has covered this event.
    /// Used to increment message `delivered_count` exactly once.
    #[serde(default)]
    pub acked: bool,
}
