//! Typed errors surfaced by every core operation.
//!
//! The core performs no automatic retry; presentation layers own retry
//! affordances and user-facing messaging. A mutation either persists and then
//! updates in-memory state, or leaves prior state untouched on failure.

use serde::Serialize;
use thiserror::Error;

/// Error kinds surfaced by core operations. Serialized one way, out to the
/// presentation layer.
#[derive(Debug, Clone, Error, Serialize)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{service} error: {message}")]
    External { service: &'static str, message: String },
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        CoreError::External {
            service,
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = CoreError::not_found("session", "abc-123");
        assert_eq!(err.to_string(), "session not found: abc-123");
    }

    #[test]
    fn test_external_display() {
        let err = CoreError::external("persistence", "connection refused");
        assert!(err.to_string().contains("persistence"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_serializes() {
        let err = CoreError::InvalidState("active plan exists".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("active plan exists"));
    }
}
