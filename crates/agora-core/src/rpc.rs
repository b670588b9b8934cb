// Agora Core - RPC envelope for the tool-server surface

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::AgoraError;
use crate::identity::IdentityClaims;

/// One request against the tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Claimed agent name, verified against the identity lock
    pub caller_agent_name: String,

    /// Claimed project directory, verified against the identity lock
    pub caller_project_dir: PathBuf,

    /// Namespaced operation name (`agora.messaging.send`, ...)
    pub op: String,

    /// Operation parameters; validated per operation
    #[serde(default)]
    pub params: serde_json::Value,

    /// Makes `agora.task.assign` / `agora.workflow.start` safe to retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Per-request deadline; clamped to the configured maximum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl ToolRequest {
    pub fn new(
        caller_agent_name: impl Into<String>,
        caller_project_dir: impl Into<PathBuf>,
        op: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            caller_agent_name: caller_agent_name.into(),
            caller_project_dir: caller_project_dir.into(),
            op: op.into(),
            params,
            idempotency_key: None,
            deadline_ms: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Identity claims carried by this request
    pub fn claims(&self) -> IdentityClaims {
        IdentityClaims {
            agent_name: self.caller_agent_name.clone(),
            project_directory: self.caller_project_dir.clone(),
        }
    }
}

/// One response from the tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,

    /// Structured result on success, including the primary identifier
    /// created by a write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Stable §7 error kind on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Human-readable message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Commit sequence of the write, when one was performed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sequence: Option<u64>,
}

impl ToolResponse {
    pub fn success(result: serde_json::Value, commit_sequence: Option<u64>) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error_kind: None,
            message: None,
            commit_sequence,
        }
    }

    pub fn failure(err: &AgoraError) -> Self {
        Self {
            ok: false,
            result: None,
            error_kind: Some(err.kind().as_str().to_string()),
            message: Some(err.to_string()),
            commit_sequence: None,
        }
    }

    /// Convert a response back into a result, for client-side use
    pub fn into_result(self) -> Result<(serde_json::Value, Option<u64>), AgoraError> {
        if self.ok {
            Ok((
                self.result.unwrap_or(serde_json::Value::Null),
                self.commit_sequence,
            ))
        } else {
            let message = self.message.unwrap_or_else(|| "unknown failure".to_string());
            let kind = self
                .error_kind
                .as_deref()
                .and_then(crate::error::ErrorKind::parse);
            Err(match kind {
                Some(crate::error::ErrorKind::IdentitySpoofing) => {
                    AgoraError::IdentitySpoofing(message)
                }
                Some(crate::error::ErrorKind::PermissionDenied) => {
                    AgoraError::PermissionDenied(message)
                }
                Some(crate::error::ErrorKind::NotFound) => AgoraError::NotFound(message),
                Some(crate::error::ErrorKind::InvalidArgument) => {
                    AgoraError::InvalidArgument(message)
                }
                Some(crate::error::ErrorKind::InvalidTransition) => {
                    AgoraError::InvalidTransition(message)
                }
                Some(crate::error::ErrorKind::Conflict) => AgoraError::Conflict(message),
                Some(crate::error::ErrorKind::DeadlineExceeded) => {
                    AgoraError::DeadlineExceeded(message)
                }
                Some(crate::error::ErrorKind::Overloaded) => AgoraError::Overloaded(message),
                Some(crate::error::ErrorKind::IdGeneration) => AgoraError::IdGeneration(message),
                Some(crate::error::ErrorKind::CursorExpired) => AgoraError::CursorExpired(message),
                Some(crate::error::ErrorKind::Halted) => AgoraError::Halted(message),
                _ => AgoraError::internal(message),
            })
        }
    }
}
