// Agora Core - Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AgoraError, AgoraResult};

/// Per-process marketplace configuration.
///
/// Loadable from the `spec` block of a `Marketplace` YAML resource; every
/// field has the documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgoraConfig {
    /// Absolute project root the process runs under
    pub project_root: PathBuf,

    /// Agent name; locked at first registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// Path of the coordination store snapshot file
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Path of the append-only audit log
    #[serde(default = "default_audit_path")]
    pub audit_path: PathBuf,

    /// Event retention window in seconds (default 72 h)
    #[serde(default = "default_event_retention_secs")]
    pub event_retention_secs: u64,

    /// Bounded per-subscriber queue size
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,

    /// Bounded reducer queue depth
    #[serde(default = "default_reducer_queue_depth")]
    pub reducer_queue_depth: usize,

    /// Default per-request deadline in milliseconds
    #[serde(default = "default_request_deadline_ms")]
    pub request_default_deadline_ms: u64,

    /// Hard cap on per-request deadlines in milliseconds
    #[serde(default = "default_request_max_deadline_ms")]
    pub request_max_deadline_ms: u64,

    /// Workflow coordinator tunables
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("agora-store.json")
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("agora-audit.jsonl")
}

fn default_event_retention_secs() -> u64 {
    72 * 60 * 60
}

fn default_subscriber_queue_size() -> usize {
    1024
}

fn default_reducer_queue_depth() -> usize {
    256
}

fn default_request_deadline_ms() -> u64 {
    30_000
}

fn default_request_max_deadline_ms() -> u64 {
    300_000
}

impl AgoraConfig {
    /// Configuration rooted at the given project directory, all defaults
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            agent_name: None,
            store_path: default_store_path(),
            audit_path: default_audit_path(),
            event_retention_secs: default_event_retention_secs(),
            subscriber_queue_size: default_subscriber_queue_size(),
            reducer_queue_depth: default_reducer_queue_depth(),
            request_default_deadline_ms: default_request_deadline_ms(),
            request_max_deadline_ms: default_request_max_deadline_ms(),
            coordinator: CoordinatorConfig::default(),
        }
    }

    /// Clamp a caller-supplied deadline into the configured window
    pub fn effective_deadline_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.request_default_deadline_ms)
            .min(self.request_max_deadline_ms)
    }

    /// Validate the configured ranges
    pub fn validate(&self) -> AgoraResult<()> {
        if !self.project_root.is_absolute() {
            return Err(AgoraError::invalid_argument(format!(
                "project_root must be absolute, got {}",
                self.project_root.display()
            )));
        }
        if self.subscriber_queue_size == 0 {
            return Err(AgoraError::invalid_argument(
                "subscriber_queue_size must be positive",
            ));
        }
        if self.reducer_queue_depth == 0 {
            return Err(AgoraError::invalid_argument(
                "reducer_queue_depth must be positive",
            ));
        }
        if self.request_default_deadline_ms > self.request_max_deadline_ms {
            return Err(AgoraError::invalid_argument(
                "default deadline exceeds the maximum deadline",
            ));
        }
        Ok(())
    }
}

/// Workflow coordinator tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Scheduler tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum retries for a failed workflow step
    #[serde(default = "default_task_retry_limit")]
    pub task_retry_limit: u32,

    /// Base of the exponential retry backoff, in seconds
    #[serde(default = "default_task_retry_backoff_secs")]
    pub task_retry_backoff_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_task_retry_limit() -> u32 {
    3
}

fn default_task_retry_backoff_secs() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            task_retry_limit: default_task_retry_limit(),
            task_retry_backoff_secs: default_task_retry_backoff_secs(),
        }
    }
}

impl CoordinatorConfig {
    /// Backoff before retry attempt `n` (1-based): base * 2^(n-1)
    pub fn retry_backoff(&self, attempt: u32) -> chrono::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        chrono::Duration::seconds((self.task_retry_backoff_secs as i64) << exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgoraConfig::new("/tmp/p");
        assert_eq!(config.event_retention_secs, 72 * 60 * 60);
        assert_eq!(config.subscriber_queue_size, 1024);
        assert_eq!(config.reducer_queue_depth, 256);
        assert_eq!(config.request_default_deadline_ms, 30_000);
        assert_eq!(config.request_max_deadline_ms, 300_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deadline_clamping() {
        let config = AgoraConfig::new("/tmp/p");
        assert_eq!(config.effective_deadline_ms(None), 30_000);
        assert_eq!(config.effective_deadline_ms(Some(10_000)), 10_000);
        assert_eq!(config.effective_deadline_ms(Some(900_000)), 300_000);
    }

    #[test]
    fn test_relative_root_rejected() {
        let config = AgoraConfig::new("relative/path");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.retry_backoff(1), chrono::Duration::seconds(30));
        assert_eq!(config.retry_backoff(2), chrono::Duration::seconds(60));
        assert_eq!(config.retry_backoff(3), chrono::Duration::seconds(120));
    }

    #[test]
    fn test_yaml_defaults_fill_in() {
        let yaml = r#"
project_root: /tmp/market
agent_name: alpha
"#;
        let config: AgoraConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.agent_name.as_deref(), Some("alpha"));
        assert_eq!(config.reducer_queue_depth, 256);
        assert_eq!(config.coordinator.task_retry_limit, 3);
    }
}
