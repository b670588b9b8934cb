// Agora Store - Snapshot persistence
//
// The whole store state lives in one JSON file, rewritten after every
// committed reducer. Transient write failures are retried up to a fixed
// budget before surfacing.

use std::path::PathBuf;
use std::time::Duration;

use agora_core::{AgoraError, AgoraResult};

use crate::state::StoreState;

/// Write attempts before a persistence failure surfaces
const WRITE_ATTEMPTS: u32 = 3;

/// Delay between persistence retries
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// JSON snapshot file holding the durable store state
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the snapshot, if one exists.
    ///
    /// A missing or empty file yields `None`; a corrupt file is an error
    /// rather than silent data loss.
    pub async fn load(&self) -> AgoraResult<Option<StoreState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AgoraError::internal(format!(
                "failed to read snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let state: StoreState = serde_json::from_str(&content).map_err(|e| {
            AgoraError::internal(format!(
                "failed to parse snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(state))
    }

    /// Persist the state, retrying transient I/O failures.
    pub async fn save(&self, state: &StoreState) -> AgoraResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AgoraError::internal(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let content = serde_json::to_string(state)
            .map_err(|e| AgoraError::internal(format!("failed to serialize snapshot: {}", e)))?;

        let mut last_err = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match tokio::fs::write(&self.path, &content).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        path = %self.path.display(),
                        error = %e,
                        "snapshot write failed"
                    );
                    last_err = Some(e);
                    if attempt < WRITE_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(AgoraError::internal(format!(
            "failed to write snapshot {} after {} attempts: {}",
            self.path.display(),
            WRITE_ATTEMPTS,
            last_err.expect("at least one attempt failed")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("store.json"));
        assert!(snapshot.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("store.json"));

        let mut state = StoreState::default();
        state.commit_sequence = 42;
        state.halted = true;
        snapshot.save(&state).await.unwrap();

        let loaded = snapshot.load().await.unwrap().unwrap();
        assert_eq!(loaded.commit_sequence, 42);
        assert!(loaded.halted);
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("nested/deep/store.json"));
        snapshot.save(&StoreState::default()).await.unwrap();
        assert!(snapshot.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let snapshot = SnapshotFile::new(&path);
        assert!(snapshot.load().await.is_err());
    }
}
