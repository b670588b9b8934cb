// Agora Fabric - Retention sweeper
//
// A background task that periodically prunes events older than the
// retention window. Pruning goes through the store writer like every
// other mutation; during an emergency halt the sweep is rejected and
// simply tried again on the next interval.

use std::time::Duration;

use agora_core::AgoraError;
use agora_store::{CoordinationStore, Reducer, ReducerRequest};

/// How often the sweeper wakes up
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Prunes events past the retention window
pub struct RetentionSweeper {
    store: CoordinationStore,
    retention: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(store: CoordinationStore, retention_secs: u64) -> Self {
        Self {
            store,
            retention: chrono::Duration::seconds(retention_secs as i64),
        }
    }

    /// Spawn the sweep loop; runs until the store shuts down
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_once().await {
                    match e {
                        AgoraError::Halted(_) => {
                            tracing::debug!("retention sweep skipped during halt")
                        }
                        AgoraError::Internal { ref message, .. }
                            if message.contains("writer stopped") =>
                        {
                            break;
                        }
                        other => tracing::warn!(error = %other, "retention sweep failed"),
                    }
                }
            }
        })
    }

    /// Run one sweep immediately
    pub async fn sweep_once(&self) -> agora_core::AgoraResult<u64> {
        let older_than = chrono::Utc::now() - self.retention;
        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::PruneEvents { older_than },
                authority: 150,
                actor: "retention-sweeper".to_string(),
                actor_agent_id: None,
            })
            .await?;
        Ok(committed.result["pruned"].as_u64().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{AgentRole, CapabilitySpec, ServiceTier};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sweep_prunes_old_events() {
        let dir = tempdir().unwrap();
        let store = CoordinationStore::open(
            dir.path().join("store.json"),
            dir.path().join("audit.jsonl"),
            256,
        )
        .await
        .unwrap();

        let mut ids = Vec::new();
        for name in ["a1", "a2"] {
            let committed = store
                .submit(ReducerRequest {
                    reducer: Reducer::RegisterAgent {
                        agent_name: name.to_string(),
                        project_directory: format!("/tmp/{}", name).into(),
                        role: AgentRole::Worker,
                        capabilities: vec![CapabilitySpec {
                            capability_type: "docs".to_string(),
                            proficiency: 50,
                            max_concurrent: 1,
                        }],
                        tier: ServiceTier::Basic,
                    },
                    authority: 25,
                    actor: name.to_string(),
                    actor_agent_id: None,
                })
                .await
                .unwrap();
            ids.push(committed.result["agent_id"].as_str().unwrap().to_string());
        }
        store
            .submit(ReducerRequest {
                reducer: Reducer::SendMessage {
                    from_agent: ids[0].clone(),
                    to_agent: ids[1].clone(),
                    message_type: "note".to_string(),
                    payload: json!({}),
                    priority: 2,
                    thread_id: None,
                },
                authority: 25,
                actor: "a1".to_string(),
                actor_agent_id: None,
            })
            .await
            .unwrap();
        assert!(!store.state().await.events.is_empty());

        // Zero retention: everything already written is past the window.
        let sweeper = RetentionSweeper::new(store.clone(), 0);
        let pruned = sweeper.sweep_once().await.unwrap();
        assert!(pruned > 0);
        assert!(store.state().await.events.is_empty());
    }
}
