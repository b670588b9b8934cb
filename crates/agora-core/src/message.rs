// Agora Core - Messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target meaning "every active agent except the sender"
pub const BROADCAST_TARGET: &str = "*";

/// Highest priority; reserved for user/emergency traffic and never dropped
/// by the event fabric
pub const EMERGENCY_PRIORITY: u8 = 5;

/// Default priority for traffic that does not declare one
pub const DEFAULT_PRIORITY: u8 = 3;

/// Validate a message/task priority (1..=5; 5 reserved for emergencies)
pub fn validate_priority(priority: u8) -> Result<(), String> {
    if !(1..=EMERGENCY_PRIORITY).contains(&priority) {
        return Err(format!("priority must be within 1..=5, got {}", priority));
    }
    Ok(())
}

/// A message exchanged between agents.
///
/// Payloads are opaque structured values and are never mutated after
/// insert; `delivered_count` only ever increases as recipients acknowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique opaque identifier (`msg_{16 hex}`)
    pub message_id: String,

    /// Sending agent
    pub from_agent: String,

    /// Receiving agent, or `*` for broadcast
    pub to_agent: String,

    /// Free-form tag describing the payload shape
    pub message_type: String,

    /// Opaque structured payload, stored verbatim
    pub payload: serde_json::Value,

    /// 1..=5; 5 reserved for emergencies
    pub priority: u8,

    /// Optional conversation grouping tag; no access control attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Insert time
    pub created_at: DateTime<Utc>,

    /// Number of recipients whose acknowledgment covers this message
    pub delivered_count: u64,
}

impl Message {
    /// Whether this message targets every active agent
    pub fn is_broadcast(&self) -> bool {
        self.to_agent == BROADCAST_TARGET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bounds() {
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(1).is_ok());
        assert!(validate_priority(5).is_ok());
        assert!(validate_priority(6).is_err());
    }

    #[test]
    fn test_broadcast_detection() {
        let msg = Message {
            message_id: "msg_0123456789abcdef".to_string(),
            from_agent: "agent_0123456789abcdef".to_string(),
            to_agent: BROADCAST_TARGET.to_string(),
            message_type: "hello".to_string(),
            payload: serde_json::json!({}),
            priority: 2,
            thread_id: None,
            created_at: Utc::now(),
            delivered_count: 0,
        };
        assert!(msg.is_broadcast());
    }
}
