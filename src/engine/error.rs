use ulid::Ulid;

use crate::model::SlotKey;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed identifier, missing field, or unusable input.
    Validation(String),
    NotFound(Ulid),
    /// Slots span resources or dates, or are not contiguous.
    Consistency(String),
    /// Slot already held or closed by the administrator.
    Conflict(SlotKey),
    Storage(StoreError),
    /// The booking aggregate could not be created or committed.
    BookingFailed(StoreError),
    FinalizeInconsistency {
        expected: usize,
        stamped: usize,
    },
    LimitExceeded(&'static str),
}

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Consistency,
    Conflict,
    Storage,
    FinalizeInconsistency,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_)
            | EngineError::NotFound(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::Consistency(_) => ErrorKind::Consistency,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Storage(_) | EngineError::BookingFailed(_) => ErrorKind::Storage,
            EngineError::FinalizeInconsistency { .. } => ErrorKind::FinalizeInconsistency,
        }
    }

    /// True when the same request may succeed after refreshing availability.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Storage(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Consistency(msg) => write!(f, "inconsistent slot selection: {msg}"),
            EngineError::Conflict(key) => write!(f, "slot not available: {key}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
            EngineError::BookingFailed(e) => write!(f, "booking could not be created: {e}"),
            EngineError::FinalizeInconsistency { expected, stamped } => write!(
                f,
                "finalize stamped {stamped} of {expected} slots; booking rolled back"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
