// Agora Core - Authority lattice and permission engine
//
// Authority levels form a small fixed ladder; the user principal sits at
// the top and is the only path around the normal permission table. Every
// decision the engine returns is audited by the caller.

use serde::{Deserialize, Serialize};

use crate::agent::AgentRole;

/// Supreme user authority; above every agent role
pub const USER_AUTHORITY: u8 = 255;

/// The acting party behind a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Principal {
    /// A verified, registered agent
    Agent {
        agent_id: String,
        agent_name: String,
        role: AgentRole,
    },
    /// The user; supreme authority
    User,
}

impl Principal {
    /// Position on the fixed authority ladder
    pub fn authority(&self) -> u8 {
        match self {
            Self::Agent { role, .. } => role.authority(),
            Self::User => USER_AUTHORITY,
        }
    }

    /// Display name used in audit records
    pub fn actor(&self) -> &str {
        match self {
            Self::Agent { agent_name, .. } => agent_name,
            Self::User => "user",
        }
    }
}

/// The seven namespaced tool-server operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    MessagingSend,
    TaskAssign,
    TaskUpdate,
    AgentRegister,
    WorkflowStart,
    QueryData,
    SystemStatus,
}

impl Operation {
    /// Parse the namespaced wire name (`agora.messaging.send`, ...)
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "agora.messaging.send" => Some(Self::MessagingSend),
            "agora.task.assign" => Some(Self::TaskAssign),
            "agora.task.update" => Some(Self::TaskUpdate),
            "agora.agent.register" => Some(Self::AgentRegister),
            "agora.workflow.start" => Some(Self::WorkflowStart),
            "agora.query.data" => Some(Self::QueryData),
            "agora.system.status" => Some(Self::SystemStatus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessagingSend => "agora.messaging.send",
            Self::TaskAssign => "agora.task.assign",
            Self::TaskUpdate => "agora.task.update",
            Self::AgentRegister => "agora.agent.register",
            Self::WorkflowStart => "agora.workflow.start",
            Self::QueryData => "agora.query.data",
            Self::SystemStatus => "agora.system.status",
        }
    }

    /// Whether the operation mutates the coordination store
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::QueryData | Self::SystemStatus)
    }
}

/// Scope details the fixed table needs beyond the operation itself
#[derive(Debug, Clone, Default)]
pub struct PermissionScope<'a> {
    /// The operation only touches records the caller owns (e.g. a task
    /// assigned to the caller, or an assignment to the caller itself)
    pub self_scoped: bool,

    /// Role requested at registration time
    pub requested_role: Option<AgentRole>,

    /// Entity named by a query operation
    pub query_entity: Option<&'a str>,
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied(String),
    /// Only a user override can authorize this
    RequiresOverride(String),
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Fixed per-operation permission table.
///
/// Cross-agent mutations are denied by default; every granted permission is
/// scoped to the operation and subject the caller presented.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEngine;

impl PermissionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one operation for one principal
    pub fn evaluate(&self, principal: &Principal, op: Operation, scope: &PermissionScope) -> Decision {
        let authority = principal.authority();

        // The user principal passes every check on the fixed surface.
        if authority == USER_AUTHORITY {
            return Decision::Granted;
        }

        let worker = AgentRole::Worker.authority();
        let specialist = AgentRole::Specialist.authority();
        let admin = AgentRole::FrameworkAdmin.authority();

        match op {
            Operation::MessagingSend => Self::at_least(authority, worker, "send_message"),
            Operation::TaskAssign => {
                if scope.self_scoped {
                    Self::at_least(authority, worker, "assign_task to self")
                } else {
                    Self::at_least(authority, specialist, "assign_task to another agent")
                }
            }
            Operation::TaskUpdate => {
                if scope.self_scoped {
                    Self::at_least(authority, worker, "update_task as assignee")
                } else {
                    Self::at_least(authority, admin, "update_task for another agent")
                }
            }
            Operation::AgentRegister => {
                // Anyone may register, but privileged roles cannot be
                // self-assigned.
                match scope.requested_role {
                    Some(role) if role.authority() >= admin && authority < role.authority() => {
                        Decision::RequiresOverride(format!(
                            "registering with role {:?} requires a user override",
                            role
                        ))
                    }
                    _ => Decision::Granted,
                }
            }
            Operation::WorkflowStart => Self::at_least(authority, specialist, "start_workflow"),
            Operation::QueryData => {
                if scope.query_entity == Some("audit") {
                    Self::at_least(authority, admin, "query audit records")
                } else {
                    Decision::Granted
                }
            }
            Operation::SystemStatus => Decision::Granted,
        }
    }

    /// Check that a user-override request really carries user authority
    pub fn evaluate_override(&self, principal: &Principal, authority_level: u8) -> Decision {
        if authority_level != USER_AUTHORITY {
            return Decision::Denied(format!(
                "user_override requires authority level {}, got {}",
                USER_AUTHORITY, authority_level
            ));
        }
        match principal {
            Principal::User => Decision::Granted,
            Principal::Agent { .. } => {
                Decision::Denied("user_override is reserved for the user principal".to_string())
            }
        }
    }

    fn at_least(authority: u8, required: u8, what: &str) -> Decision {
        if authority >= required {
            Decision::Granted
        } else {
            Decision::Denied(format!(
                "{} requires authority >= {}, caller has {}",
                what, required, authority
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(role: AgentRole) -> Principal {
        Principal::Agent {
            agent_id: "agent_0123456789abcdef".to_string(),
            agent_name: "tester".to_string(),
            role,
        }
    }

    #[test]
    fn test_send_requires_worker() {
        let engine = PermissionEngine::new();
        let scope = PermissionScope::default();
        assert!(!engine
            .evaluate(&agent(AgentRole::Observer), Operation::MessagingSend, &scope)
            .is_granted());
        assert!(engine
            .evaluate(&agent(AgentRole::Worker), Operation::MessagingSend, &scope)
            .is_granted());
    }

    #[test]
    fn test_cross_agent_assignment_requires_specialist() {
        let engine = PermissionEngine::new();
        let cross = PermissionScope {
            self_scoped: false,
            ..Default::default()
        };
        let own = PermissionScope {
            self_scoped: true,
            ..Default::default()
        };
        assert!(!engine
            .evaluate(&agent(AgentRole::Worker), Operation::TaskAssign, &cross)
            .is_granted());
        assert!(engine
            .evaluate(&agent(AgentRole::Worker), Operation::TaskAssign, &own)
            .is_granted());
        assert!(engine
            .evaluate(&agent(AgentRole::Specialist), Operation::TaskAssign, &cross)
            .is_granted());
    }

    #[test]
    fn test_privileged_registration_requires_override() {
        let engine = PermissionEngine::new();
        let scope = PermissionScope {
            requested_role: Some(AgentRole::FrameworkAdmin),
            ..Default::default()
        };
        match engine.evaluate(&agent(AgentRole::Worker), Operation::AgentRegister, &scope) {
            Decision::RequiresOverride(_) => {}
            other => panic!("expected RequiresOverride, got {:?}", other),
        }
    }

    #[test]
    fn test_audit_queries_restricted() {
        let engine = PermissionEngine::new();
        let scope = PermissionScope {
            query_entity: Some("audit"),
            ..Default::default()
        };
        assert!(!engine
            .evaluate(&agent(AgentRole::Specialist), Operation::QueryData, &scope)
            .is_granted());
        assert!(engine
            .evaluate(&agent(AgentRole::FrameworkAdmin), Operation::QueryData, &scope)
            .is_granted());
    }

    #[test]
    fn test_user_passes_everything() {
        let engine = PermissionEngine::new();
        let scope = PermissionScope {
            query_entity: Some("audit"),
            ..Default::default()
        };
        assert!(engine
            .evaluate(&Principal::User, Operation::QueryData, &scope)
            .is_granted());
    }

    #[test]
    fn test_override_requires_exact_user_authority() {
        let engine = PermissionEngine::new();
        assert!(engine
            .evaluate_override(&Principal::User, USER_AUTHORITY)
            .is_granted());
        assert!(!engine.evaluate_override(&Principal::User, 250).is_granted());
        assert!(!engine
            .evaluate_override(&agent(AgentRole::Overseer), USER_AUTHORITY)
            .is_granted());
    }

    #[test]
    fn test_operation_wire_names_round_trip() {
        for op in [
            Operation::MessagingSend,
            Operation::TaskAssign,
            Operation::TaskUpdate,
            Operation::AgentRegister,
            Operation::WorkflowStart,
            Operation::QueryData,
            Operation::SystemStatus,
        ] {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operation::parse("agora.unknown.op"), None);
    }
}
