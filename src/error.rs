//! Error Types
//!
//! One taxonomy for the whole server. Action-level failures are turned into
//! an `Error` result code for the calling client; only transport failures
//! end a session.

use thiserror::Error;

use crate::protocol::ResultCode;

/// Server error types
#[derive(Error, Debug)]
pub enum QarsError {
    // === Session Errors ===
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    // === Startup Errors ===
    #[error("Corrupt artifact {name}: {reason}")]
    CorruptArtifact { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Action Errors ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failed for {name}: {reason}")]
    Persistence { name: String, reason: String },

    // === Collaborator Errors ===
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Collaborator failed: {0}")]
    Collaborator(String),
}

impl QarsError {
    /// Build a `CorruptArtifact` error
    pub fn corrupt(name: impl Into<String>, reason: impl ToString) -> Self {
        QarsError::CorruptArtifact {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a `Persistence` error
    pub fn persistence(name: impl Into<String>, reason: impl ToString) -> Self {
        QarsError::Persistence {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable error code (used in logs)
    pub fn code(&self) -> &'static str {
        match self {
            QarsError::Transport(_) => "TRANSPORT",
            QarsError::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
            QarsError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            QarsError::CorruptArtifact { .. } => "CORRUPT_ARTIFACT",
            QarsError::Config(_) => "CONFIG",
            QarsError::Validation(_) => "VALIDATION",
            QarsError::Conflict(_) => "CONFLICT",
            QarsError::NotFound(_) => "NOT_FOUND",
            QarsError::Persistence { .. } => "PERSISTENCE",
            QarsError::Notification(_) => "NOTIFICATION",
            QarsError::Collaborator(_) => "COLLABORATOR",
        }
    }

    /// Whether this error terminates the session that hit it
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QarsError::Transport(_) | QarsError::FrameTooLarge { .. } | QarsError::MalformedPayload(_)
        )
    }

    /// Result code reported to the client for an action-level failure
    pub fn result_code(&self) -> ResultCode {
        match self {
            QarsError::Transport(_)
            | QarsError::FrameTooLarge { .. }
            | QarsError::MalformedPayload(_) => ResultCode::Shutdown,
            _ => ResultCode::Error,
        }
    }
}

impl From<bincode::Error> for QarsError {
    fn from(e: bincode::Error) -> Self {
        QarsError::MalformedPayload(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(QarsError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(QarsError::corrupt("qars.active", "bad kind").code(), "CORRUPT_ARTIFACT");
        assert_eq!(QarsError::Conflict("busy".into()).code(), "CONFLICT");
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(QarsError::Validation("x".into()).result_code(), ResultCode::Error);
        assert_eq!(QarsError::Conflict("x".into()).result_code(), ResultCode::Error);
        assert_eq!(
            QarsError::persistence("qars.pending", "disk full").result_code(),
            ResultCode::Error
        );
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(QarsError::from(io).result_code(), ResultCode::Shutdown);
    }

    #[test]
    fn test_transport_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(QarsError::from(io).is_transport());
        assert!(QarsError::FrameTooLarge { size: 10, limit: 5 }.is_transport());
        assert!(!QarsError::NotFound("CR999".into()).is_transport());
    }

    #[test]
    fn test_display() {
        let err = QarsError::corrupt("qars.active", "unexpected element kind");
        assert_eq!(
            err.to_string(),
            "Corrupt artifact qars.active: unexpected element kind"
        );
    }
}
