// Agora Core - Identity lock and verification
//
// Each project directory carries a locked configuration binding one agent
// name to that directory. The lock is one-way: once written it can only be
// cleared by a user override. Every authenticated call re-verifies the
// binding; any mismatch is treated as spoofing and logged as a security
// event by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AgoraError, AgoraResult};

/// Name of the locked configuration file under the project root
pub const IDENTITY_FILE: &str = ".agora-identity.json";

/// The locked per-project identity configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedIdentity {
    pub agent_name: String,

    /// Absolute project directory the name is bound to
    pub project_directory: PathBuf,

    pub locked_at: DateTime<Utc>,
}

/// Identity claims attached to an inbound request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityClaims {
    pub agent_name: String,
    pub project_directory: PathBuf,
}

/// Stateless verifier over the per-project lock files
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityVerifier;

impl IdentityVerifier {
    pub fn new() -> Self {
        Self
    }

    fn lock_path(project_root: &Path) -> PathBuf {
        project_root.join(IDENTITY_FILE)
    }

    /// Load the locked configuration, if one exists
    pub async fn load(&self, project_root: &Path) -> AgoraResult<Option<LockedIdentity>> {
        let path = Self::lock_path(project_root);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AgoraError::internal(format!(
                "failed to read identity file {}: {}",
                path.display(),
                e
            ))
        })?;
        let locked: LockedIdentity = serde_json::from_str(&content).map_err(|e| {
            AgoraError::internal(format!(
                "failed to parse identity file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(locked))
    }

    /// Write the one-way lock for a project directory.
    ///
    /// Idempotent when the existing lock matches the claimed name; a lock
    /// for a different name is spoofing, not an update.
    pub async fn lock(&self, project_root: &Path, agent_name: &str) -> AgoraResult<LockedIdentity> {
        if !project_root.is_absolute() {
            return Err(AgoraError::invalid_argument(format!(
                "project directory must be absolute, got {}",
                project_root.display()
            )));
        }

        if let Some(existing) = self.load(project_root).await? {
            if existing.agent_name == agent_name {
                return Ok(existing);
            }
            return Err(AgoraError::identity_spoofing(format!(
                "project {} is locked to '{}', refusing to relock as '{}'",
                project_root.display(),
                existing.agent_name,
                agent_name
            )));
        }

        let locked = LockedIdentity {
            agent_name: agent_name.to_string(),
            project_directory: project_root.to_path_buf(),
            locked_at: Utc::now(),
        };

        tokio::fs::create_dir_all(project_root).await.map_err(|e| {
            AgoraError::internal(format!(
                "failed to create project root {}: {}",
                project_root.display(),
                e
            ))
        })?;
        let content = serde_json::to_string_pretty(&locked)
            .map_err(|e| AgoraError::internal(format!("failed to serialize identity: {}", e)))?;
        let path = Self::lock_path(project_root);
        tokio::fs::write(&path, content).await.map_err(|e| {
            AgoraError::internal(format!(
                "failed to write identity file {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!(
            agent_name = %locked.agent_name,
            project = %project_root.display(),
            "identity locked"
        );
        Ok(locked)
    }

    /// Verify claims against the locked configuration.
    ///
    /// Three points are checked together: the lock file exists, the locked
    /// project directory matches the claimed one, and the locked name
    /// matches the claimed name. Any mismatch yields
    /// `IdentitySpoofingError`.
    pub async fn verify(&self, claims: &IdentityClaims) -> AgoraResult<LockedIdentity> {
        let locked = self
            .load(&claims.project_directory)
            .await?
            .ok_or_else(|| {
                AgoraError::identity_spoofing(format!(
                    "no identity lock found under {}",
                    claims.project_directory.display()
                ))
            })?;

        if locked.project_directory != claims.project_directory {
            return Err(AgoraError::identity_spoofing(format!(
                "locked project directory {} does not match claimed {}",
                locked.project_directory.display(),
                claims.project_directory.display()
            )));
        }

        if locked.agent_name != claims.agent_name {
            return Err(AgoraError::identity_spoofing(format!(
                "claimed name '{}' does not match locked name '{}'",
                claims.agent_name, locked.agent_name
            )));
        }

        Ok(locked)
    }

    /// Clear the lock. Reserved for user overrides; ordinary agents have
    /// no path to this.
    pub async fn clear(&self, project_root: &Path) -> AgoraResult<()> {
        let path = Self::lock_path(project_root);
        if path.exists() {
            tokio::fs::remove_file(&path).await.map_err(|e| {
                AgoraError::internal(format!(
                    "failed to remove identity file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::warn!(project = %project_root.display(), "identity lock cleared");
        }
        Ok(())
    }
}
