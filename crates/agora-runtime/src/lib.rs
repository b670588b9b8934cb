// Agora Runtime - Tool server and workflow coordinator
//
// The runtime crate hosts the two active components of the marketplace:
// the tool server, which exposes the seven `agora.*` operations over the
// structured RPC envelope, and the workflow coordinator, which turns
// workflow declarations into task assignments and drives them to
// completion. `Marketplace` wires both onto a store and fabric.

pub mod coordinator;
pub mod marketplace;
pub mod server;

// Re-export main types
pub use coordinator::matching::{candidates, select, Candidate};
pub use coordinator::WorkflowCoordinator;
pub use marketplace::Marketplace;
pub use server::ops::{
    AssignParams, QueryDataParams, RegisterParams, SendParams, UpdateParams, WorkflowStartParams,
};
pub use server::ToolServer;
