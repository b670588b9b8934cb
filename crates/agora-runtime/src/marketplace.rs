// Agora Runtime - Marketplace assembly
//
// Wires the store, fabric, coordinator, retention sweeper, and tool
// server together from one configuration.

use std::sync::Arc;

use agora_core::{AgoraConfig, AgoraResult};
use agora_fabric::{EventFabric, RetentionSweeper};
use agora_store::CoordinationStore;

use crate::coordinator::WorkflowCoordinator;
use crate::server::ToolServer;

/// A running marketplace: every core component, wired
pub struct Marketplace {
    pub store: CoordinationStore,
    pub fabric: Arc<EventFabric>,
    pub server: Arc<ToolServer>,
    coordinator_handle: tokio::task::JoinHandle<()>,
    sweeper_handle: tokio::task::JoinHandle<()>,
}

impl Marketplace {
    /// Start every component from one configuration
    pub async fn start(config: AgoraConfig) -> AgoraResult<Self> {
        config.validate()?;

        let store = CoordinationStore::open(
            config.project_root.join(&config.store_path),
            config.project_root.join(&config.audit_path),
            config.reducer_queue_depth,
        )
        .await?;

        let fabric = EventFabric::new(store.clone(), config.subscriber_queue_size);

        let coordinator =
            WorkflowCoordinator::new(store.clone(), config.coordinator.clone());
        let coordinator_handle = coordinator.spawn();

        let sweeper = RetentionSweeper::new(store.clone(), config.event_retention_secs);
        let sweeper_handle = sweeper.spawn();

        let server = Arc::new(ToolServer::new(store.clone(), fabric.clone(), config));

        tracing::info!("marketplace started");
        Ok(Self {
            store,
            fabric,
            server,
            coordinator_handle,
            sweeper_handle,
        })
    }

    /// Stop the background tasks. Store writes drain with the store
    /// handle itself; the final snapshot is already on disk because every
    /// commit persists before it becomes visible.
    pub fn shutdown(self) {
        self.coordinator_handle.abort();
        self.sweeper_handle.abort();
        tracing::info!("marketplace stopped");
    }
}
