//! Error types for Lintel
//!
//! Pattern adapted from doorway's `DoorwayError`: one flat enum with string
//! payloads, plus a classification into the reconciliation taxonomy so callers
//! can pick a retry policy without matching on every variant.

/// Classification used by the reconciler and controller retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced role, permission or directory node is absent
    NotFound,
    /// Concurrent writer committed first; reread and retry
    Conflict,
    /// Network or database timeout; retry with bounded backoff
    Transient,
    /// Computed state diverges from what the store or directory reports
    InvariantViolation,
    /// Controller cannot continue; exit and let the supervisor restart us
    Fatal,
}

/// Main error type for Lintel operations
#[derive(Debug, thiserror::Error)]
pub enum LintelError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LintelError {
    /// Map this error onto the reconciliation taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) | Self::Nats(_) => ErrorKind::Transient,
            Self::InvariantViolation(_) | Self::Decode(_) => ErrorKind::InvariantViolation,
            Self::Fatal(_) | Self::Config(_) => ErrorKind::Fatal,
            Self::Database(_) | Self::Http(_) | Self::Internal(_) => {
                ErrorKind::InvariantViolation
            }
        }
    }

    /// Whether a retry (after reread) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Conflict)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<rusqlite::Error> for LintelError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("no rows returned".into()),
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Transient(format!("database busy: {}", err))
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for LintelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::Transient(format!("directory request failed: {}", err));
        }
        match err.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => {
                Self::NotFound(err.to_string())
            }
            Some(status) if status.is_server_error() => Self::Transient(err.to_string()),
            _ => Self::Http(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for LintelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

impl From<async_nats::Error> for LintelError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for LintelError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transient("deadline elapsed".into())
    }
}

impl From<tokio::task::JoinError> for LintelError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {}", err))
    }
}

/// Result type alias for Lintel operations
pub type Result<T> = std::result::Result<T, LintelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(LintelError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(LintelError::Nats("x".into()).kind(), ErrorKind::Transient);
        assert_eq!(LintelError::Config("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(
            LintelError::Decode("x".into()).kind(),
            ErrorKind::InvariantViolation
        );
    }

    #[test]
    fn test_retryable() {
        assert!(LintelError::Transient("timeout".into()).is_retryable());
        assert!(LintelError::Conflict("revision moved".into()).is_retryable());
        assert!(!LintelError::NotFound("gone".into()).is_retryable());
        assert!(!LintelError::Fatal("dead".into()).is_retryable());
    }

    #[test]
    fn test_no_rows_is_not_found() {
        let err: LintelError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_display() {
        let err = LintelError::InvariantViolation("cycle at 42".into());
        assert_eq!(err.to_string(), "Invariant violation: cycle at 42");
    }
}
