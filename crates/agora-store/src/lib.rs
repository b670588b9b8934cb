// Agora Store - Durable single-writer coordination store
//
// The store owns every entity of the marketplace: agents, capabilities,
// messages, tasks, workflows, steps, events, and cursors, all serialized
// into one JSON snapshot. Mutations are reducers applied serially by a
// single writer task; readers see the committed snapshot. The append-only
// audit log lives alongside the snapshot.

pub mod audit_log;
pub mod persist;
pub mod query;
pub mod reducer;
pub mod state;
pub mod store;

// Re-export main types
pub use audit_log::AuditLog;
pub use persist::SnapshotFile;
pub use query::{QueryPage, QueryParams, QUERYABLE_ENTITIES};
pub use reducer::{OverrideAction, Reducer, ReducerOutcome, ReducerRequest};
pub use state::{IdempotencyEntry, StoreState};
pub use store::{CommitNotice, Committed, CoordinationStore};
