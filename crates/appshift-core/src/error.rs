//! Error types for appshift.
//!
//! The variants follow the reconciliation taxonomy: transient connectivity
//! failures, validation conflicts, structural defects and unit-scoped
//! migration failures, plus the plumbing errors (IO, JSON, SQLite) they wrap.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for appshift.
#[derive(Debug, Error)]
pub enum ShiftError {
    // Live store errors
    #[error("Data store unreachable: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Reconciliation taxonomy
    #[error("Validation error for {subject}: {message}")]
    Validation { subject: String, message: String },

    #[error("Structural defect in {entity}: {message}")]
    StructuralDefect { entity: String, message: String },

    #[error("Migration unit {unit} failed: {message}")]
    UnitFailure { unit: String, message: String },

    // Lookups
    #[error("Entity not found: {name}")]
    EntityNotFound { name: String },

    #[error("Namespace not found: {name}")]
    NamespaceNotFound { name: String },

    #[error("Session not found: {name}")]
    SessionNotFound { name: String },

    #[error("Session record {name} is unreadable: {message}")]
    SessionCorrupt { name: String, message: String },

    #[error("Migration plan not found: {id}")]
    PlanNotFound { id: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for appshift operations.
pub type Result<T> = std::result::Result<T, ShiftError>;

/// Coarse error category used by callers to decide whether to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Validation,
    StructuralDefect,
    UnitFailure,
    Internal,
}

impl From<std::io::Error> for ShiftError {
    fn from(err: std::io::Error) -> Self {
        ShiftError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ShiftError {
    fn from(err: serde_json::Error) -> Self {
        ShiftError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for ShiftError {
    fn from(err: rusqlite::Error) -> Self {
        if is_transient_sqlite(&err) {
            ShiftError::Connectivity {
                message: err.to_string(),
                source: Some(err),
            }
        } else {
            ShiftError::Database {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

/// SQLite result codes that indicate the store is temporarily unavailable
/// rather than that the statement itself is wrong.
fn is_transient_sqlite(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}

impl ShiftError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ShiftError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error.
    pub fn validation(subject: impl Into<String>, message: impl Into<String>) -> Self {
        ShiftError::Validation {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a connectivity error without an underlying SQLite cause.
    pub fn connectivity(message: impl Into<String>) -> Self {
        ShiftError::Connectivity {
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error should trigger a reconnect-and-retry.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ShiftError::Connectivity { .. })
    }

    /// Map to the reconciliation error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShiftError::Connectivity { .. } => ErrorKind::Connectivity,

            ShiftError::Validation { .. }
            | ShiftError::EntityNotFound { .. }
            | ShiftError::NamespaceNotFound { .. }
            | ShiftError::SessionNotFound { .. }
            | ShiftError::PlanNotFound { .. }
            | ShiftError::Config { .. } => ErrorKind::Validation,

            ShiftError::StructuralDefect { .. } => ErrorKind::StructuralDefect,

            ShiftError::UnitFailure { .. } => ErrorKind::UnitFailure,

            _ => ErrorKind::Internal,
        }
    }
}
