// Agora Core - Agent and capability records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Role of a registered agent, ordered by ascending authority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    /// Read-only participant
    Observer,
    /// Regular worker agent
    #[default]
    Worker,
    /// Specialist agent; may assign work to others and start workflows
    Specialist,
    /// Administrator of framework-managed records
    FrameworkAdmin,
    /// Top-level orchestrating agent
    Overseer,
}

impl AgentRole {
    /// Fixed authority level on the lattice.
    ///
    /// The user principal sits above every role at 255; see
    /// [`crate::authority::USER_AUTHORITY`].
    pub fn authority(&self) -> u8 {
        match self {
            Self::Observer => 10,
            Self::Worker => 25,
            Self::Specialist => 75,
            Self::FrameworkAdmin => 150,
            Self::Overseer => 250,
        }
    }
}

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Participating normally
    #[default]
    Active,
    /// Temporarily paused (e.g. during an emergency halt)
    Paused,
    /// Suspended by an administrator or user override
    Suspended,
    /// Not currently connected; excluded from broadcasts
    Offline,
}

/// Service tier of a registered agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    #[default]
    Basic,
    Premium,
    Enterprise,
}

/// A registered marketplace agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique opaque identifier (`agent_{16 hex}`)
    pub agent_id: String,

    /// Unique name, immutable once locked at first registration
    pub agent_name: String,

    /// Absolute project directory the agent is bound to
    pub project_directory: PathBuf,

    /// Role on the authority lattice
    pub role: AgentRole,

    /// Current lifecycle status
    pub status: AgentStatus,

    /// When the agent first registered
    pub registered_at: DateTime<Utc>,

    /// Updated on every authenticated operation
    pub last_seen_at: DateTime<Utc>,

    /// Service tier
    #[serde(default)]
    pub service_tier: ServiceTier,
}

/// A declared ability of an agent to perform a class of tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Unique opaque identifier (`cap_{16 hex}`)
    pub capability_id: String,

    /// Owning agent
    pub agent_id: String,

    /// Free-form capability identifier, matched against task types
    pub capability_type: String,

    /// Proficiency on a 1..=100 scale
    pub proficiency_level: u8,

    /// Concurrency bound for assignments against this capability
    pub max_concurrent_tasks: u32,

    /// Deactivating a capability does not touch assignments already made
    pub active: bool,
}

/// Capability declaration supplied at registration time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Capability identifier (e.g. "docs", "review")
    #[serde(rename = "type")]
    pub capability_type: String,

    /// Proficiency on a 1..=100 scale
    pub proficiency: u8,

    /// Concurrency bound; defaults to 1
    #[serde(rename = "max", default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_max_concurrent() -> u32 {
    1
}

impl CapabilitySpec {
    /// Validate the declared ranges
    pub fn validate(&self) -> Result<(), String> {
        if self.capability_type.trim().is_empty() {
            return Err("capability type must not be empty".to_string());
        }
        if !(1..=100).contains(&self.proficiency) {
            return Err(format!(
                "proficiency must be within 1..=100, got {}",
                self.proficiency
            ));
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_authority_ladder() {
        assert!(AgentRole::Observer.authority() < AgentRole::Worker.authority());
        assert!(AgentRole::Worker.authority() < AgentRole::Specialist.authority());
        assert!(AgentRole::Specialist.authority() < AgentRole::FrameworkAdmin.authority());
        assert!(AgentRole::FrameworkAdmin.authority() < AgentRole::Overseer.authority());
        assert_eq!(AgentRole::Overseer.authority(), 250);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(
            serde_json::to_string(&AgentRole::FrameworkAdmin).unwrap(),
            "\"FRAMEWORK_ADMIN\""
        );
        let role: AgentRole = serde_json::from_str("\"OBSERVER\"").unwrap();
        assert_eq!(role, AgentRole::Observer);
    }

    #[test]
    fn test_capability_spec_validation() {
        let spec = CapabilitySpec {
            capability_type: "docs".to_string(),
            proficiency: 80,
            max_concurrent: 3,
        };
        assert!(spec.validate().is_ok());

        let bad = CapabilitySpec {
            capability_type: "docs".to_string(),
            proficiency: 0,
            max_concurrent: 3,
        };
        assert!(bad.validate().is_err());

        let bad = CapabilitySpec {
            capability_type: "docs".to_string(),
            proficiency: 50,
            max_concurrent: 0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_capability_spec_wire_shape() {
        let spec: CapabilitySpec =
            serde_json::from_str(r#"{"type":"docs","proficiency":80,"max":3}"#).unwrap();
        assert_eq!(spec.capability_type, "docs");
        assert_eq!(spec.proficiency, 80);
        assert_eq!(spec.max_concurrent, 3);

        // max defaults to 1 when omitted
        let spec: CapabilitySpec =
            serde_json::from_str(r#"{"type":"review","proficiency":60}"#).unwrap();
        assert_eq!(spec.max_concurrent, 1);
    }
}
