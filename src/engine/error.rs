use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// The requested interval overlaps this existing booking.
    BookingConflict(Ulid),
    BookingNotFound(Ulid),
    NotAuthorized,
    PatternNotFound(Ulid),
    SlotNotFound(Ulid),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    Cancelled,
    /// Storage failed; the cause is kept for diagnostics.
    Internal(StoreError),
}

impl EngineError {
    /// Classify a storage error. `not_found` names what a missing row means for
    /// the calling operation.
    pub(crate) fn from_store(err: StoreError, not_found: fn(Ulid) -> EngineError) -> Self {
        match err {
            StoreError::NotFound(id) => not_found(id),
            StoreError::Forbidden(_) => EngineError::NotAuthorized,
            StoreError::Overlap(id) => EngineError::BookingConflict(id),
            StoreError::Cancelled => EngineError::Cancelled,
            other => EngineError::Internal(other),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::BookingConflict(id) => write!(f, "booking time slot conflict with {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::NotAuthorized => write!(f, "not authorized"),
            EngineError::PatternNotFound(id) => write!(f, "availability pattern not found: {id}"),
            EngineError::SlotNotFound(id) => write!(f, "availability slot not found: {id}"),
            EngineError::Invalid(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Cancelled => write!(f, "operation cancelled"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Internal(e) => Some(e),
            _ => None,
        }
    }
}
