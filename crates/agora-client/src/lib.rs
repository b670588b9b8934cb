// Agora Client - Consumer client library
//
// The thin outbound adapter agents embed to call the tool server:
// resolves the locked identity, attaches it to every request, retries
// transient failures with jittered backoff, generates idempotency keys
// for assign/start, and maintains one cursor-resuming event subscription
// per agent.

pub mod client;
pub mod subscription;
pub mod transport;

// Re-export main types
pub use client::{AgoraClient, RetryPolicy};
pub use subscription::EventSubscription;
pub use transport::{InProcessTransport, Transport};
