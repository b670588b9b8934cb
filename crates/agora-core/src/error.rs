// Agora Core - Error taxonomy
//
// Every failure in the marketplace is categorized exactly once. The wire
// representation (`ErrorKind`) is stable; clients branch on it to decide
// whether a retry is worthwhile.

use thiserror::Error;

/// Result type alias used throughout the workspace
pub type AgoraResult<T> = Result<T, AgoraError>;

/// Unified error type for all marketplace operations
#[derive(Error, Debug, Clone)]
pub enum AgoraError {
    /// Verified identity does not match the claimed identity. Fatal to the
    /// request and recorded as a security event.
    #[error("Identity spoofing detected: {0}")]
    IdentitySpoofing(String),

    /// Authority insufficient for the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request, unknown enum value, or missing field
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// State-machine transition rejected
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Unique-key violation or idempotency collision with a different payload
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Per-request deadline elapsed before commit
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Reducer or subscriber queue full; retryable
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// Entropy source unavailable; retryable
    #[error("Id generation failed: {0}")]
    IdGeneration(String),

    /// Subscriber cursor predates the retention horizon
    #[error("Cursor expired: {0}")]
    CursorExpired(String),

    /// Emergency halt is in force; only user operations accepted
    #[error("Marketplace halted: {0}")]
    Halted(String),

    /// Any unclassified failure; carries a correlation identifier that
    /// operators can match against audit entries
    #[error("Internal error [{correlation_id}]: {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },
}

impl AgoraError {
    pub fn identity_spoofing(msg: impl Into<String>) -> Self {
        Self::IdentitySpoofing(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn deadline_exceeded(msg: impl Into<String>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }

    pub fn overloaded(msg: impl Into<String>) -> Self {
        Self::Overloaded(msg.into())
    }

    pub fn id_generation(msg: impl Into<String>) -> Self {
        Self::IdGeneration(msg.into())
    }

    pub fn cursor_expired(msg: impl Into<String>) -> Self {
        Self::CursorExpired(msg.into())
    }

    pub fn halted(msg: impl Into<String>) -> Self {
        Self::Halted(msg.into())
    }

    /// Build an internal error with a fresh correlation identifier
    pub fn internal(msg: impl Into<String>) -> Self {
        use rand::Rng;
        let correlation_id = format!("corr_{:08x}", rand::thread_rng().gen::<u32>());
        Self::Internal {
            correlation_id,
            message: msg.into(),
        }
    }

    /// Stable wire kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IdentitySpoofing(_) => ErrorKind::IdentitySpoofing,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::Overloaded(_) => ErrorKind::Overloaded,
            Self::IdGeneration(_) => ErrorKind::IdGeneration,
            Self::CursorExpired(_) => ErrorKind::CursorExpired,
            Self::Halted(_) => ErrorKind::Halted,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether a client may retry the operation with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Overloaded(_) | Self::IdGeneration(_) | Self::Internal { .. }
        )
    }
}

impl From<std::io::Error> for AgoraError {
    fn from(err: std::io::Error) -> Self {
        AgoraError::internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for AgoraError {
    fn from(err: serde_json::Error) -> Self {
        AgoraError::invalid_argument(format!("JSON error: {}", err))
    }
}

/// Stable error discriminant carried in RPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    IdentitySpoofing,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    InvalidTransition,
    Conflict,
    DeadlineExceeded,
    Overloaded,
    IdGeneration,
    CursorExpired,
    Halted,
    Internal,
}

impl ErrorKind {
    /// Wire string used in `ToolResponse::error_kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentitySpoofing => "IdentitySpoofingError",
            Self::PermissionDenied => "PermissionDenied",
            Self::NotFound => "NotFound",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidTransition => "InvalidTransitionError",
            Self::Conflict => "Conflict",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::Overloaded => "Overloaded",
            Self::IdGeneration => "IdGenerationError",
            Self::CursorExpired => "CursorExpired",
            Self::Halted => "Halted",
            Self::Internal => "Internal",
        }
    }

    /// Parse a wire string back into a kind
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IdentitySpoofingError" => Some(Self::IdentitySpoofing),
            "PermissionDenied" => Some(Self::PermissionDenied),
            "NotFound" => Some(Self::NotFound),
            "InvalidArgument" => Some(Self::InvalidArgument),
            "InvalidTransitionError" => Some(Self::InvalidTransition),
            "Conflict" => Some(Self::Conflict),
            "DeadlineExceeded" => Some(Self::DeadlineExceeded),
            "Overloaded" => Some(Self::Overloaded),
            "IdGenerationError" => Some(Self::IdGeneration),
            "CursorExpired" => Some(Self::CursorExpired),
            "Halted" => Some(Self::Halted),
            "Internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether errors of this kind are retryable by clients
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Overloaded | Self::IdGeneration | Self::Internal
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
