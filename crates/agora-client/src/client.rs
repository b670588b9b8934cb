// Agora Client - Marketplace client
//
// The outbound adapter agents use to talk to the tool server. It resolves
// the locked identity once, attaches it to every request, retries
// transient failures with jittered exponential backoff, and generates
// idempotency keys for the two insert operations so retries are safe.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use agora_core::{
    AgoraError, AgoraResult, IdentityVerifier, TaskStatus, ToolRequest,
};

use crate::subscription::EventSubscription;
use crate::transport::Transport;

/// Backoff policy for transient errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (0-based), with jitter
    fn delay(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.cap);
        // Up to 50% jitter keeps retry storms from synchronizing.
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Client for one locked agent identity
pub struct AgoraClient {
    transport: Arc<dyn Transport>,
    agent_name: String,
    project_root: PathBuf,
    retry: RetryPolicy,
    agent_id: RwLock<Option<String>>,
}

impl AgoraClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        agent_name: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            agent_name: agent_name.into(),
            project_root: project_root.into(),
            retry: RetryPolicy::default(),
            agent_id: RwLock::new(None),
        }
    }

    /// Build a client from the locked identity under `project_root`
    pub async fn from_locked_identity(
        transport: Arc<dyn Transport>,
        project_root: impl AsRef<Path>,
    ) -> AgoraResult<Self> {
        let root = project_root.as_ref();
        let locked = IdentityVerifier::new()
            .load(root)
            .await?
            .ok_or_else(|| {
                AgoraError::not_found(format!(
                    "no identity lock under {}",
                    root.display()
                ))
            })?;
        Ok(Self::new(transport, locked.agent_name, locked.project_directory))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The registered agent id, once known
    pub async fn agent_id(&self) -> Option<String> {
        self.agent_id.read().await.clone()
    }

    /// Invoke one operation with retry on transient failures.
    ///
    /// The idempotency key, when one applies, is fixed before the first
    /// attempt so every retry replays the same write.
    pub async fn call(
        &self,
        op: &str,
        params: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> AgoraResult<serde_json::Value> {
        let mut request = ToolRequest::new(
            self.agent_name.clone(),
            self.project_root.clone(),
            op,
            params,
        );
        if let Some(key) = idempotency_key {
            request = request.with_idempotency_key(key);
        }

        let mut attempt = 0;
        loop {
            let response = self.transport.call(request.clone()).await?;
            match response.into_result() {
                Ok((result, _)) => return Ok(result),
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Register this agent with its capabilities
    pub async fn register(
        &self,
        agent_type: &str,
        capabilities: serde_json::Value,
        metadata: serde_json::Value,
    ) -> AgoraResult<serde_json::Value> {
        let result = self
            .call(
                "agora.agent.register",
                json!({
                    "agent_type": agent_type,
                    "capabilities": capabilities,
                    "metadata": metadata,
                }),
                None,
            )
            .await?;
        if let Some(id) = result["agent_id"].as_str() {
            *self.agent_id.write().await = Some(id.to_string());
        }
        Ok(result)
    }

    /// Send a message, or broadcast with `to_agent = "*"`
    pub async fn send_message(
        &self,
        to_agent: &str,
        message_type: &str,
        payload: serde_json::Value,
        priority: Option<u8>,
        thread_id: Option<&str>,
    ) -> AgoraResult<serde_json::Value> {
        let mut params = json!({
            "to_agent": to_agent,
            "message_type": message_type,
            "payload": payload,
        });
        if let Some(p) = priority {
            params["priority"] = json!(p);
        }
        if let Some(t) = thread_id {
            params["thread_id"] = json!(t);
        }
        self.call("agora.messaging.send", params, None).await
    }

    /// Assign a task; retries reuse one generated idempotency key
    pub async fn assign_task(
        &self,
        assignee: &str,
        task_type: &str,
        payload: serde_json::Value,
        priority: Option<u8>,
        deadline: Option<chrono::DateTime<chrono::Utc>>,
        workflow_id: Option<&str>,
    ) -> AgoraResult<serde_json::Value> {
        let mut params = json!({
            "assignee": assignee,
            "task_type": task_type,
            "payload": payload,
        });
        if let Some(p) = priority {
            params["priority"] = json!(p);
        }
        if let Some(d) = deadline {
            params["deadline"] = json!(d);
        }
        if let Some(w) = workflow_id {
            params["workflow_id"] = json!(w);
        }
        self.call(
            "agora.task.assign",
            params,
            Some(Uuid::new_v4().to_string()),
        )
        .await
    }

    /// Report task progress or a status transition
    pub async fn update_task(
        &self,
        task_id: &str,
        status: Option<TaskStatus>,
        progress: Option<u8>,
        result: Option<serde_json::Value>,
    ) -> AgoraResult<serde_json::Value> {
        let mut params = json!({ "task_id": task_id });
        if let Some(s) = status {
            params["status"] = serde_json::to_value(s)?;
        }
        if let Some(p) = progress {
            params["progress"] = json!(p);
        }
        if let Some(r) = result {
            params["result"] = r;
        }
        self.call("agora.task.update", params, None).await
    }

    /// Start a workflow; retries reuse one generated idempotency key
    pub async fn start_workflow(
        &self,
        workflow_name: &str,
        steps: serde_json::Value,
        metadata: serde_json::Value,
    ) -> AgoraResult<serde_json::Value> {
        self.call(
            "agora.workflow.start",
            json!({
                "workflow_name": workflow_name,
                "steps": steps,
                "metadata": metadata,
            }),
            Some(Uuid::new_v4().to_string()),
        )
        .await
    }

    /// Read-only projection over the coordination store
    pub async fn query(
        &self,
        entity: &str,
        filter: serde_json::Value,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> AgoraResult<serde_json::Value> {
        let mut params = json!({ "entity": entity, "filter": filter });
        if let Some(l) = limit {
            params["limit"] = json!(l);
        }
        if let Some(c) = cursor {
            params["cursor"] = json!(c);
        }
        self.call("agora.query.data", params, None).await
    }

    /// Aggregate marketplace health
    pub async fn system_status(&self) -> AgoraResult<serde_json::Value> {
        self.call("agora.system.status", json!({}), None).await
    }

    /// Attach the event subscription for this agent, resuming from the
    /// durable cursor (or resynchronizing if it expired)
    pub async fn subscribe(&self) -> AgoraResult<EventSubscription> {
        let agent_id = self
            .agent_id()
            .await
            .ok_or_else(|| AgoraError::invalid_argument("register before subscribing"))?;
        EventSubscription::attach(self.transport.clone(), agent_id).await
    }
}
