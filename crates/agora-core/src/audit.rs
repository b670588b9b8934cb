// Agora Core - Audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of an authority decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Granted,
    Denied,
    Error,
}

/// One append-only audit entry.
///
/// Records are written for every authority decision, user override,
/// identity-spoofing detection, and event drop. They are never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Opaque identifier (`audit_{16 hex}`)
    pub audit_id: String,

    /// Agent name, agent id, or the literal `user`
    pub actor: String,

    /// Operation or reducer name
    pub operation: String,

    /// Entity or target the operation addressed
    pub subject: String,

    pub outcome: AuditOutcome,

    pub reason: String,

    /// Authority level the actor held at decision time
    pub authority_level: u8,

    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_round_trip() {
        let record = AuditRecord {
            audit_id: "audit_0123456789abcdef".to_string(),
            actor: "user".to_string(),
            operation: "user_override".to_string(),
            subject: "*".to_string(),
            outcome: AuditOutcome::Granted,
            reason: "incident".to_string(),
            authority_level: 255,
            at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outcome, AuditOutcome::Granted);
        assert_eq!(parsed.authority_level, 255);
    }
}
