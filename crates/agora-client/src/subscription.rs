// Agora Client - Event subscription
//
// One subscription per agent, resumed from the durable cursor on every
// attach. When the cursor predates the retention horizon the
// subscription resynchronizes to the present; the agent is expected to
// rebuild its view through queries rather than replaying lost events.

use std::sync::Arc;

use agora_core::{AgoraError, AgoraResult, EventRecord};

use crate::transport::Transport;

/// A cursor-resuming event subscription
pub struct EventSubscription {
    transport: Arc<dyn Transport>,
    agent_id: String,
    cursor: u64,

    /// True when the last attach had to resynchronize past lost events
    resynced: bool,
}

impl EventSubscription {
    /// Attach for an agent, resuming from its durable cursor
    pub async fn attach(transport: Arc<dyn Transport>, agent_id: String) -> AgoraResult<Self> {
        let (subscription, resynced) = match transport.subscribe(&agent_id, None).await {
            Ok(sub) => (sub, false),
            Err(AgoraError::CursorExpired(_)) => {
                tracing::warn!(agent_id = %agent_id, "cursor expired; resynchronizing");
                (transport.resync(&agent_id).await?, true)
            }
            Err(err) => return Err(err),
        };
        Ok(Self {
            transport,
            agent_id,
            cursor: subscription.cursor,
            resynced,
        })
    }

    /// Durable cursor position at the last attach or acknowledgment
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether the last attach lost events to retention and jumped to
    /// the present
    pub fn resynced(&self) -> bool {
        self.resynced
    }

    /// Take up to `max` pending events, in per-recipient order.
    ///
    /// Delivery is at-least-once: events not acknowledged before a crash
    /// are delivered again on the next attach.
    pub async fn next_batch(&mut self, max: usize) -> AgoraResult<Vec<EventRecord>> {
        self.transport.poll_events(&self.agent_id, max).await
    }

    /// Acknowledge everything through `sequence`
    pub async fn ack_through(&mut self, sequence: u64) -> AgoraResult<()> {
        let cursor = self.transport.ack(&self.agent_id, sequence).await?;
        self.cursor = cursor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AgoraClient;
    use crate::transport::InProcessTransport;
    use agora_core::AgoraConfig;
    use agora_runtime::Marketplace;
    use serde_json::json;
    use tempfile::TempDir;

    async fn harness(dir: &TempDir) -> (Marketplace, Arc<InProcessTransport>) {
        let mut config = AgoraConfig::new(dir.path());
        config.coordinator.tick_interval_ms = 25;
        let market = Marketplace::start(config).await.unwrap();
        let transport = Arc::new(InProcessTransport::new(
            market.server.clone(),
            market.fabric.clone(),
        ));
        (market, transport)
    }

    fn client(transport: &Arc<InProcessTransport>, dir: &TempDir, name: &str) -> AgoraClient {
        AgoraClient::new(transport.clone(), name, dir.path().join(name))
    }

    #[tokio::test]
    async fn test_subscribe_poll_ack_resume() {
        let dir = TempDir::new().unwrap();
        let (_market, transport) = harness(&dir).await;

        let sender = client(&transport, &dir, "sender");
        sender.register("generic", json!([]), json!({})).await.unwrap();
        let receiver = client(&transport, &dir, "receiver");
        receiver.register("generic", json!([]), json!({})).await.unwrap();
        let receiver_id = receiver.agent_id().await.unwrap();

        let mut subscription = receiver.subscribe().await.unwrap();
        assert!(!subscription.resynced());

        sender
            .send_message(&receiver_id, "ping", json!({"n": 1}), Some(2), None)
            .await
            .unwrap();
        sender
            .send_message(&receiver_id, "ping", json!({"n": 2}), Some(2), None)
            .await
            .unwrap();

        // Give the fabric pump a moment to route the commits.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let batch = subscription.next_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        subscription.ack_through(batch[0].sequence).await.unwrap();

        // Re-attach: only the unacknowledged event replays.
        let mut resumed = receiver.subscribe().await.unwrap();
        let replay = resumed.next_batch(10).await.unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].sequence, batch[1].sequence);
    }

    #[tokio::test]
    async fn test_client_identity_round_trip() {
        let dir = TempDir::new().unwrap();
        let (_market, transport) = harness(&dir).await;

        let original = client(&transport, &dir, "alpha");
        original.register("generic", json!([]), json!({})).await.unwrap();

        // A fresh process resolves the same identity from the lock file.
        let resumed = AgoraClient::from_locked_identity(
            transport.clone() as Arc<dyn Transport>,
            dir.path().join("alpha"),
        )
        .await
        .unwrap();
        let status = resumed.system_status().await.unwrap();
        assert_eq!(status["healthy"], true);
    }

    #[tokio::test]
    async fn test_assign_task_is_retry_safe() {
        let dir = TempDir::new().unwrap();
        let (market, transport) = harness(&dir).await;

        let boss = client(&transport, &dir, "boss");
        boss.register(
            "generic",
            json!([{"type": "docs", "proficiency": 80, "max": 5}]),
            json!({"role": "SPECIALIST"}),
        )
        .await
        .unwrap();
        let boss_id = boss.agent_id().await.unwrap();

        let result = boss
            .assign_task(&boss_id, "docs", json!({"file": "x.md"}), Some(2), None, None)
            .await
            .unwrap();
        assert!(result["task_id"].as_str().unwrap().starts_with("task_"));
        assert_eq!(market.store.state().await.tasks.len(), 1);
    }
}
