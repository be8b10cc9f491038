//! Error types for the estimation controller.
//!
//! `EcError` is the engine's public error surface. Transports map
//! `error_code()` onto their wire protocol and show `client_message()` to
//! end users; internal detail stays in logs.

use thiserror::Error;

/// Errors surfaced by the session engine.
#[derive(Debug, Error)]
pub enum EcError {
    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Estimation scale not found in the catalog.
    #[error("Scale not found: {0}")]
    ScaleNotFound(String),

    /// Registry is draining (graceful shutdown).
    #[error("Registry is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EcError {
    /// Returns the numeric wire code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            EcError::SessionNotFound(_) | EcError::ScaleNotFound(_) => 4, // NOT_FOUND
            EcError::Internal(_) => 6,                                    // INTERNAL_ERROR
            EcError::Draining => 7,                                       // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            EcError::SessionNotFound(_) => "Session not found".to_string(),
            EcError::ScaleNotFound(_) => "Unknown estimation scale".to_string(),
            EcError::Draining => "Service is shutting down".to_string(),
            EcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            EcError::SessionNotFound("abc123".to_string()).error_code(),
            4
        );
        assert_eq!(EcError::ScaleNotFound("tshirt".to_string()).error_code(), 4);
        assert_eq!(EcError::Draining.error_code(), 7);
        assert_eq!(
            EcError::Internal("channel closed".to_string()).error_code(),
            6
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = EcError::Internal("mpsc send failed for session Xy9Z".to_string());
        let message = err.client_message();
        assert!(!message.contains("mpsc"));
        assert!(!message.contains("Xy9Z"));
        assert_eq!(message, "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        let err = EcError::SessionNotFound("aB3dE5fG7hJ9kL1m".to_string());
        assert_eq!(err.to_string(), "Session not found: aB3dE5fG7hJ9kL1m");

        let err = EcError::Draining;
        assert_eq!(err.to_string(), "Registry is draining");
    }
}
