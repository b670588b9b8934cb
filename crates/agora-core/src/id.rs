// Agora Core - Identifier service
//
// Opaque identifiers with a type prefix and a high-entropy body:
// `{prefix}_{16 lowercase hex chars}`. The generator never consults
// counters and never reads previous identifiers; uniqueness rests on the
// entropy source alone. An earlier counter-based scheme collided after
// restarts, which is why no part of this module is allowed to remember
// anything between calls.

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AgoraError, AgoraResult};

/// Shape every marketplace identifier must match
static ID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(agent|cap|msg|task|wf|step|evt|audit)_[0-9a-f]{16}$")
        .expect("identifier regex is valid")
});

/// Entity type prefix for generated identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdPrefix {
    /// Agent records
    Agent,
    /// Capability records
    Cap,
    /// Messages
    Msg,
    /// Task assignments
    Task,
    /// Workflows
    Wf,
    /// Workflow steps
    Step,
    /// Events on the fabric
    Evt,
    /// Audit records
    Audit,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Cap => "cap",
            Self::Msg => "msg",
            Self::Task => "task",
            Self::Wf => "wf",
            Self::Step => "step",
            Self::Evt => "evt",
            Self::Audit => "audit",
        }
    }
}

/// Stateless identifier generator backed by the OS entropy source
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    /// Generate a fresh identifier for the given entity type.
    ///
    /// Fails with `IdGenerationError` only when the entropy source is
    /// unavailable; callers should treat that as transient and retry.
    pub fn generate(prefix: IdPrefix) -> AgoraResult<String> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| AgoraError::id_generation(format!("entropy source unavailable: {}", e)))?;

        // Draw the full 128 bits, render the low 64 as 16 hex chars.
        let body = u128::from_le_bytes(bytes) as u64;
        Ok(format!("{}_{:016x}", prefix.as_str(), body))
    }

    /// Check an identifier against the required shape
    pub fn is_valid(id: &str) -> bool {
        ID_SHAPE.is_match(id)
    }

    /// Check that an identifier has the required shape *and* the expected
    /// entity prefix
    pub fn is_valid_for(id: &str, prefix: IdPrefix) -> bool {
        Self::is_valid(id) && id.starts_with(prefix.as_str()) && id.as_bytes().get(prefix.as_str().len()) == Some(&b'_')
    }
}
