// Agora Core - Task assignments and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle status.
///
/// `pending → accepted → in_progress → completed`; `failed` reachable from
/// any non-terminal state; `cancelled` from any non-terminal state.
/// `failed → pending` exists only through the coordinator's retry policy,
/// never through a caller-visible transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Accepted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are possible (outside retry)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the ordinary state machine permits `self → next`.
    ///
    /// A transition to the current state is permitted and treated as a
    /// no-op by the reducer, which makes status updates safe to retry.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == next {
            return !self.is_terminal();
        }
        match (self, next) {
            (Pending, Accepted) => true,
            (Accepted, InProgress) => true,
            (InProgress, Completed) => true,
            (Pending | Accepted | InProgress, Failed) => true,
            (Pending | Accepted | InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

/// A unit of work assigned to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// Unique opaque identifier (`task_{16 hex}`)
    pub task_id: String,

    /// Owning workflow, when the task was emitted by the coordinator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    /// Assigned agent
    pub assignee: String,

    /// Matched against the assignee's capability types
    pub task_type: String,

    /// Opaque structured payload
    pub payload: serde_json::Value,

    /// 1..=5
    pub priority: u8,

    /// Policy deadline; overdue tasks are failed by the coordinator,
    /// not preempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// 0..=100, non-decreasing within a single run
    pub progress: u8,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Present on terminal states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Retry attempts consumed so far (workflow tasks only)
    #[serde(default)]
    pub retry_count: u32,
}

impl TaskAssignment {
    /// Whether the policy deadline has passed for a still-running task
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(deadline) => !self.status.is_terminal() && now > deadline,
            None => false,
        }
    }
}
