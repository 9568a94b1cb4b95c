use crate::model::ConflictingSlot;
use crate::timefmt::format_ms;

#[derive(Debug)]
pub enum EngineError {
    /// Missing, empty or unparsable input. Raised before the store is touched.
    Validation(String),
    /// The candidate interval intersects a stored, unexpired slot.
    Conflict(ConflictingSlot),
    LimitExceeded(&'static str),
    /// WAL failure, writer shutdown or timeout. Safe to retry.
    Storage(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict(c) => write!(
                f,
                "time slot overlaps with an existing slot for {} [{}, {})",
                c.subject_name,
                format_ms(c.start),
                format_ms(c.end)
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
