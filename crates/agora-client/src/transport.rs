// Agora Client - Transport abstraction
//
// The client talks to the tool server through an object-safe trait so the
// same code serves an in-process marketplace and, later, a remote one.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use agora_core::{AgoraResult, EventRecord, EventType, ToolRequest, ToolResponse};
use agora_fabric::{EventFabric, Subscription};
use agora_runtime::ToolServer;

/// Outbound path from an agent to the marketplace
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke one tool-server operation
    async fn call(&self, request: ToolRequest) -> AgoraResult<ToolResponse>;

    /// Attach (or refresh) the event subscription for an agent
    async fn subscribe(
        &self,
        agent_id: &str,
        event_types: Option<HashSet<EventType>>,
    ) -> AgoraResult<Subscription>;

    /// Reset an expired subscription to the present
    async fn resync(&self, agent_id: &str) -> AgoraResult<Subscription>;

    /// Take pending events for an agent
    async fn poll_events(&self, agent_id: &str, max: usize) -> AgoraResult<Vec<EventRecord>>;

    /// Acknowledge events through `sequence`, committing the durable cursor
    async fn ack(&self, agent_id: &str, sequence: u64) -> AgoraResult<u64>;
}

/// Transport wired directly to an in-process marketplace
pub struct InProcessTransport {
    server: Arc<ToolServer>,
    fabric: Arc<EventFabric>,
}

impl InProcessTransport {
    pub fn new(server: Arc<ToolServer>, fabric: Arc<EventFabric>) -> Self {
        Self { server, fabric }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn call(&self, request: ToolRequest) -> AgoraResult<ToolResponse> {
        Ok(self.server.handle(request).await)
    }

    async fn subscribe(
        &self,
        agent_id: &str,
        event_types: Option<HashSet<EventType>>,
    ) -> AgoraResult<Subscription> {
        self.fabric.subscribe(agent_id, event_types).await
    }

    async fn resync(&self, agent_id: &str) -> AgoraResult<Subscription> {
        self.fabric.resync(agent_id).await
    }

    async fn poll_events(&self, agent_id: &str, max: usize) -> AgoraResult<Vec<EventRecord>> {
        Ok(self.fabric.poll(agent_id, max))
    }

    async fn ack(&self, agent_id: &str, sequence: u64) -> AgoraResult<u64> {
        self.fabric.ack(agent_id, sequence).await
    }
}
