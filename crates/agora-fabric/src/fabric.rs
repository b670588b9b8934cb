// Agora Fabric - Event delivery
//
// The fabric pumps committed events from the store into per-subscriber
// bounded queues and manages durable cursors. Delivery is at-least-once:
// events stay durable in the store until the recipient's cursor covers
// them, so a subscriber that crashes between poll and ack sees the same
// events again after reconnecting.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use agora_core::{AgoraError, AgoraResult, AuditOutcome, EventRecord, EventType};
use agora_store::{CoordinationStore, Reducer, ReducerRequest};

use crate::subscriber::{PushOutcome, SubscriberQueue};

/// Per-subscriber ordered event delivery
pub struct EventFabric {
    store: CoordinationStore,
    queues: Arc<DashMap<String, SubscriberQueue>>,
    queue_capacity: usize,
}

/// Outcome of a subscription call
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Durable cursor the subscriber resumes from
    pub cursor: u64,

    /// Events that were already waiting past the cursor
    pub backlog: usize,
}

impl EventFabric {
    /// Build the fabric and spawn its pump task
    pub fn new(store: CoordinationStore, queue_capacity: usize) -> Arc<Self> {
        let fabric = Arc::new(Self {
            store: store.clone(),
            queues: Arc::new(DashMap::new()),
            queue_capacity,
        });

        let pump = fabric.clone();
        tokio::spawn(async move {
            pump.run_pump().await;
        });

        fabric
    }

    /// Register (or refresh) a subscriber and backfill its queue from the
    /// durable cursor.
    ///
    /// Returns `CursorExpired` when the durable cursor predates the prune
    /// horizon; the subscriber must resynchronize with
    /// [`EventFabric::resync`] and rebuild its view from current state.
    pub async fn subscribe(
        &self,
        agent_id: &str,
        event_types: Option<HashSet<EventType>>,
    ) -> AgoraResult<Subscription> {
        let (cursor, backlog) = {
            let state = self.store.state().await;
            let cursor = state.cursors.get(agent_id).copied().unwrap_or(0);
            if state.cursor_expired(agent_id, cursor) {
                return Err(AgoraError::cursor_expired(format!(
                    "cursor {} for {} predates the retention horizon",
                    cursor, agent_id
                )));
            }
            (cursor, state.events_for(agent_id, cursor))
        };

        let mut queue = SubscriberQueue::new(self.queue_capacity, event_types);
        queue.set_last_enqueued(cursor);
        let mut queued = 0usize;
        for event in backlog {
            if queue.wants(event.event_type) {
                self.offer(&mut queue, agent_id, event);
                queued += 1;
            } else {
                let last_enqueued = queue.last_enqueued();
                queue.set_last_enqueued(event.sequence.max(last_enqueued));
            }
        }
        self.queues.insert(agent_id.to_string(), queue);

        tracing::debug!(agent_id, cursor, backlog = queued, "subscriber attached");
        Ok(Subscription {
            cursor,
            backlog: queued,
        })
    }

    /// Reset an expired subscriber to the present: the durable cursor
    /// jumps to the latest sequence and the queue starts empty. The
    /// subscriber is expected to rebuild its view via `agora.query.data`.
    pub async fn resync(&self, agent_id: &str) -> AgoraResult<Subscription> {
        let (latest, authority) = {
            let state = self.store.state().await;
            (
                state.target_sequences.get(agent_id).copied().unwrap_or(0),
                self.authority_of(&state, agent_id),
            )
        };
        self.store
            .submit(ReducerRequest {
                reducer: Reducer::CommitCursor {
                    agent_id: agent_id.to_string(),
                    sequence: latest,
                },
                authority,
                actor: agent_id.to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await?;

        let mut queue = SubscriberQueue::new(self.queue_capacity, None);
        queue.set_last_enqueued(latest);
        self.queues.insert(agent_id.to_string(), queue);
        tracing::info!(agent_id, cursor = latest, "subscriber resynchronized");
        Ok(Subscription {
            cursor: latest,
            backlog: 0,
        })
    }

    /// Remove a subscriber's in-memory queue; the durable cursor stays
    pub fn unsubscribe(&self, agent_id: &str) {
        self.queues.remove(agent_id);
    }

    /// Take up to `max` pending events for a subscriber, in per-recipient
    /// sequence order
    pub fn poll(&self, agent_id: &str, max: usize) -> Vec<EventRecord> {
        match self.queues.get_mut(agent_id) {
            Some(mut queue) => queue.drain(max),
            None => Vec::new(),
        }
    }

    /// Acknowledge every event with sequence at or below `sequence`,
    /// committing the durable cursor
    pub async fn ack(&self, agent_id: &str, sequence: u64) -> AgoraResult<u64> {
        let authority = {
            let state = self.store.state().await;
            self.authority_of(&state, agent_id)
        };
        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::CommitCursor {
                    agent_id: agent_id.to_string(),
                    sequence,
                },
                authority,
                actor: agent_id.to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await?;
        Ok(committed.result["cursor"].as_u64().unwrap_or(sequence))
    }

    /// Authority the cursor commit runs at: the subscriber's own role
    fn authority_of(&self, state: &agora_store::StoreState, agent_id: &str) -> u8 {
        state
            .agents
            .get(agent_id)
            .map(|a| a.role.authority())
            .unwrap_or(10)
    }

    /// Current queue depth for one subscriber
    pub fn queue_depth(&self, agent_id: &str) -> usize {
        self.queues.get(agent_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Total queued events across subscribers
    pub fn total_depth(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Feed loop: commit notices in, queue pushes out
    async fn run_pump(self: Arc<Self>) {
        let mut commits = self.store.subscribe_commits();
        loop {
            match commits.recv().await {
                Ok(notice) => {
                    if notice.halt {
                        self.flush_non_emergency();
                    }
                    for event in notice.events {
                        self.route(event);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "commit feed lagged; resyncing queues from store");
                    self.backfill_all().await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("fabric pump stopped");
    }

    fn route(&self, event: EventRecord) {
        if let Some(mut queue) = self.queues.get_mut(&event.target_agent) {
            if !queue.wants(event.event_type) {
                let last_enqueued = queue.last_enqueued();
                queue.set_last_enqueued(event.sequence.max(last_enqueued));
                return;
            }
            let agent_id = event.target_agent.clone();
            self.offer(&mut queue, &agent_id, event);
        }
    }

    fn offer(&self, queue: &mut SubscriberQueue, agent_id: &str, event: EventRecord) {
        match queue.push(event) {
            PushOutcome::Enqueued => {}
            PushOutcome::Displaced(victim) | PushOutcome::Rejected(victim) => {
                tracing::warn!(
                    agent_id,
                    event_id = %victim.event_id,
                    priority = victim.priority,
                    "subscriber queue overflow dropped an event"
                );
                if let Err(e) = self.store.audit().record(
                    agent_id,
                    "event_dropped",
                    victim.event_id.clone(),
                    AuditOutcome::Error,
                    format!("queue overflow at priority {}", victim.priority),
                    0,
                ) {
                    tracing::error!(error = %e, "failed to audit event drop");
                }
            }
        }
    }

    /// Refill every queue from the durable event table after the commit
    /// feed lagged
    async fn backfill_all(&self) {
        let state = self.store.state().await;
        for mut entry in self.queues.iter_mut() {
            let agent_id = entry.key().clone();
            let after = entry.value().last_enqueued();
            for event in state.events_for(&agent_id, after) {
                if entry.value().wants(event.event_type) {
                    let queue = entry.value_mut();
                    match queue.push(event) {
                        PushOutcome::Enqueued => {}
                        PushOutcome::Displaced(victim) | PushOutcome::Rejected(victim) => {
                            tracing::warn!(
                                agent_id = %agent_id,
                                event_id = %victim.event_id,
                                "overflow during backfill"
                            );
                        }
                    }
                } else {
                    let seq = event.sequence;
                    let queue = entry.value_mut();
                    queue.set_last_enqueued(seq.max(queue.last_enqueued()));
                }
            }
        }
    }

    fn flush_non_emergency(&self) {
        let mut flushed = 0usize;
        for mut entry in self.queues.iter_mut() {
            flushed += entry.value_mut().flush_non_emergency();
        }
        if flushed > 0 {
            tracing::warn!(flushed, "emergency halt flushed non-priority-5 events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{AgentRole, CapabilitySpec, ServiceTier, BROADCAST_TARGET};
    use serde_json::json;
    use tempfile::tempdir;

    async fn open_store(dir: &tempfile::TempDir) -> CoordinationStore {
        CoordinationStore::open(
            dir.path().join("store.json"),
            dir.path().join("audit.jsonl"),
            256,
        )
        .await
        .unwrap()
    }

    fn request(reducer: Reducer) -> ReducerRequest {
        ReducerRequest {
            reducer,
            authority: 75,
            actor: "test".to_string(),
            actor_agent_id: None,
        }
    }

    async fn register(store: &CoordinationStore, name: &str) -> String {
        let committed = store
            .submit(request(Reducer::RegisterAgent {
                agent_name: name.to_string(),
                project_directory: format!("/tmp/{}", name).into(),
                role: AgentRole::Worker,
                capabilities: vec![CapabilitySpec {
                    capability_type: "docs".to_string(),
                    proficiency: 80,
                    max_concurrent: 3,
                }],
                tier: ServiceTier::Basic,
            }))
            .await
            .unwrap();
        committed.result["agent_id"].as_str().unwrap().to_string()
    }

    async fn send(store: &CoordinationStore, from: &str, to: &str, priority: u8) {
        store
            .submit(request(Reducer::SendMessage {
                from_agent: from.to_string(),
                to_agent: to.to_string(),
                message_type: "note".to_string(),
                payload: json!({}),
                priority,
                thread_id: None,
            }))
            .await
            .unwrap();
    }

    /// Wait until the pump has drained the commit feed into the queues.
    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_delivery_in_sequence_order() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let fabric = EventFabric::new(store.clone(), 64);

        let a1 = register(&store, "a1").await;
        let a2 = register(&store, "a2").await;
        fabric.subscribe(&a2, None).await.unwrap();

        for _ in 0..3 {
            send(&store, &a1, &a2, 2).await;
        }
        settle().await;

        let events = fabric.poll(&a2, 10);
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn test_cursor_resumption_after_reconnect() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let fabric = EventFabric::new(store.clone(), 64);

        let a1 = register(&store, "a1").await;
        let a2 = register(&store, "a2").await;
        fabric.subscribe(&a2, None).await.unwrap();

        send(&store, &a1, &a2, 2).await;
        send(&store, &a1, &a2, 2).await;
        settle().await;

        let events = fabric.poll(&a2, 10);
        assert_eq!(events.len(), 2);
        fabric.ack(&a2, events[0].sequence).await.unwrap();

        // Reconnect: only the unacknowledged event comes back.
        fabric.unsubscribe(&a2);
        let sub = fabric.subscribe(&a2, None).await.unwrap();
        assert_eq!(sub.cursor, events[0].sequence);
        let replay = fabric.poll(&a2, 10);
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].sequence, events[1].sequence);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let fabric = EventFabric::new(store.clone(), 64);

        let a1 = register(&store, "a1").await;
        let a2 = register(&store, "a2").await;
        let a3 = register(&store, "a3").await;

        // Filter to message deliveries so the registration broadcasts of
        // later agents do not show up in the counts.
        let mut types = HashSet::new();
        types.insert(EventType::MessageSent);
        fabric.subscribe(&a2, Some(types.clone())).await.unwrap();
        fabric.subscribe(&a3, Some(types)).await.unwrap();

        send(&store, &a1, BROADCAST_TARGET, 2).await;
        settle().await;

        let e2 = fabric.poll(&a2, 10);
        let e3 = fabric.poll(&a3, 10);
        assert_eq!(e2.len(), 1);
        assert_eq!(e3.len(), 1);
        // Shared event id, per-recipient sequences.
        assert_eq!(e2[0].event_id, e3[0].event_id);
    }

    #[tokio::test]
    async fn test_type_filtered_subscription() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let fabric = EventFabric::new(store.clone(), 64);

        let a1 = register(&store, "a1").await;
        let a2 = register(&store, "a2").await;

        let mut types = HashSet::new();
        types.insert(EventType::TaskAssigned);
        fabric.subscribe(&a2, Some(types)).await.unwrap();

        send(&store, &a1, &a2, 2).await;
        settle().await;
        assert!(fabric.poll(&a2, 10).is_empty());
    }

    #[tokio::test]
    async fn test_expired_cursor_forces_resync() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let fabric = EventFabric::new(store.clone(), 64);

        let a1 = register(&store, "a1").await;
        let a2 = register(&store, "a2").await;
        send(&store, &a1, &a2, 2).await;

        // Prune everything; a2 never acknowledged, so its cursor expires.
        store
            .submit(request(Reducer::PruneEvents {
                older_than: chrono::Utc::now() + chrono::Duration::seconds(1),
            }))
            .await
            .unwrap();

        let err = fabric.subscribe(&a2, None).await.unwrap_err();
        assert!(matches!(err, AgoraError::CursorExpired(_)));

        let sub = fabric.resync(&a2).await.unwrap();
        assert_eq!(sub.backlog, 0);
        // After resync the subscriber attaches cleanly.
        fabric.unsubscribe(&a2);
        fabric.subscribe(&a2, None).await.unwrap();
    }
}
