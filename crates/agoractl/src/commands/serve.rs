//! Serve command - runs the marketplace daemon
//!
//! Loads a `Marketplace` YAML resource, starts the coordination store,
//! event fabric, workflow coordinator, and retention sweeper, and runs
//! until interrupted. Every commit is already durable before it becomes
//! visible, so shutdown is just stopping the background tasks.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use agora_core::AgoraConfig;
use agora_runtime::Marketplace;

/// Marketplace configuration resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceResource {
    /// API version (agora.dev/v1)
    #[serde(rename = "apiVersion")]
    pub api_version: Option<String>,

    /// Kind (Marketplace)
    pub kind: Option<String>,

    /// Metadata
    #[serde(default)]
    pub metadata: ResourceMetadata,

    /// The per-process configuration
    pub spec: AgoraConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

pub fn load_config(path: &str) -> anyhow::Result<AgoraConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path))?;
    let resource: MarketplaceResource = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path))?;
    Ok(resource.spec)
}

pub async fn execute(file: &str) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let name = config
        .project_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "marketplace".to_string());

    let market = Marketplace::start(config)
        .await
        .context("failed to start marketplace")?;
    tracing::info!(%name, "marketplace serving; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    market.shutdown();
    Ok(())
}
