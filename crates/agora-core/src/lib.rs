// Agora Core - Foundation types and traits for the Agora Marketplace Core
//
// This crate provides the shared vocabulary of the marketplace: entity
// records, the identifier service, the identity lock, the authority
// lattice, the error taxonomy, and the RPC envelope. Higher crates build
// the store, fabric, runtime, and client on top of these types.

pub mod agent;
pub mod audit;
pub mod authority;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod identity;
pub mod message;
pub mod rpc;
pub mod task;
pub mod workflow;

// Re-export core types
pub use agent::{Agent, AgentRole, AgentStatus, Capability, CapabilitySpec, ServiceTier};
pub use audit::{AuditOutcome, AuditRecord};
pub use authority::{
    Decision, Operation, PermissionEngine, PermissionScope, Principal, USER_AUTHORITY,
};
pub use config::{AgoraConfig, CoordinatorConfig};
pub use error::{AgoraError, AgoraResult, ErrorKind};
pub use event::{EventRecord, EventType};
pub use id::{IdGenerator, IdPrefix};
pub use identity::{IdentityClaims, IdentityVerifier, LockedIdentity, IDENTITY_FILE};
pub use message::{
    validate_priority, Message, BROADCAST_TARGET, DEFAULT_PRIORITY, EMERGENCY_PRIORITY,
};
pub use rpc::{ToolRequest, ToolResponse};
pub use task::{TaskAssignment, TaskStatus};
pub use workflow::{validate_step_dag, StepSpec, Workflow, WorkflowStatus, WorkflowStep};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
