use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input: inverted or empty stay, blank guest name, bad date.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// The requested stay is oversubscribed; nothing was written.
    #[error("no availability on {first_blocked}")]
    Conflict { first_blocked: NaiveDate },
    /// The `(source, external_id)` pair is already taken.
    #[error("duplicate delivery of reservation {0}")]
    DuplicateDelivery(ReservationId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// Durable storage refused the write. Transient; safe to retry.
    #[error("journal error: {0}")]
    Journal(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Journal(_))
    }
}
