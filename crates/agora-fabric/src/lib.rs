// Agora Fabric - Real-time event delivery
//
// The fabric delivers state-change notifications to subscribed agents
// with at-least-once semantics and per-recipient ordering. Queues are
// bounded and priority-aware; durable cursors in the coordination store
// let a subscriber disconnect and resume without losing events, until the
// retention window expires them.

pub mod fabric;
pub mod retention;
pub mod subscriber;

// Re-export main types
pub use fabric::{EventFabric, Subscription};
pub use retention::RetentionSweeper;
pub use subscriber::{PushOutcome, SubscriberQueue};
