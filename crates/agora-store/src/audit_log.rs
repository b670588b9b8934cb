// Agora Store - Append-only audit log
//
// One JSON line per record, appended under a single lock and never
// rewritten. The in-memory tail serves queries; the file is the durable
// artifact.

use parking_lot::Mutex;
use std::io::Write;
use std::path::PathBuf;

use agora_core::{AgoraError, AgoraResult, AuditOutcome, AuditRecord, IdGenerator, IdPrefix};

/// Append-only audit ledger
pub struct AuditLog {
    path: PathBuf,
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Open the log, loading any existing records
    pub fn open(path: impl Into<PathBuf>) -> AgoraResult<Self> {
        let path = path.into();
        let mut records = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                AgoraError::internal(format!("failed to read audit log {}: {}", path.display(), e))
            })?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let record: AuditRecord = serde_json::from_str(line).map_err(|e| {
                    AgoraError::internal(format!(
                        "corrupt audit line in {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                records.push(record);
            }
        }
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Append a fully-formed record
    pub fn append(&self, record: AuditRecord) -> AgoraResult<()> {
        let line = serde_json::to_string(&record)
            .map_err(|e| AgoraError::internal(format!("failed to serialize audit record: {}", e)))?;

        // Single append lock; writers never contend beyond this.
        let mut records = self.records.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AgoraError::internal(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                AgoraError::internal(format!(
                    "failed to open audit log {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        writeln!(file, "{}", line).map_err(|e| {
            AgoraError::internal(format!(
                "failed to append audit log {}: {}",
                self.path.display(),
                e
            ))
        })?;
        records.push(record);
        Ok(())
    }

    /// Build and append a record in one call
    pub fn record(
        &self,
        actor: impl Into<String>,
        operation: impl Into<String>,
        subject: impl Into<String>,
        outcome: AuditOutcome,
        reason: impl Into<String>,
        authority_level: u8,
    ) -> AgoraResult<AuditRecord> {
        let record = AuditRecord {
            audit_id: IdGenerator::generate(IdPrefix::Audit)?,
            actor: actor.into(),
            operation: operation.into(),
            subject: subject.into(),
            outcome,
            reason: reason.into(),
            authority_level,
            at: chrono::Utc::now(),
        };
        self.append(record.clone())?;
        Ok(record)
    }

    /// Most recent records, newest last
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }

    /// Every record, oldest first
    pub fn all(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
