//! Error types for taskcal
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad action, missing row reference, invalid field)
//! - 3: Conflict (stale row version)
//! - 4: Operation failed (IO, calendar collaborator, lock contention)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the taskcal CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskcal operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Missing reference: {0}")]
    MissingReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value for '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Conflicts (exit code 3)
    #[error("Row {row} changed: expected version {expected}, stored version is {stored}")]
    VersionConflict { row: usize, expected: u64, stored: u64 },

    // Operation failures (exit code 4)
    #[error("Calendar unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Calendar call timed out after {0} ms")]
    CollaboratorTimeout(u64),

    #[error("Calendar event {0} no longer exists")]
    StaleExternalReference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),
}

impl Error {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidAction(_)
            | Error::MissingReference(_)
            | Error::NotFound(_)
            | Error::InvalidField { .. }
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            Error::VersionConflict { .. } => exit_codes::CONFLICT,

            Error::CollaboratorUnavailable(_)
            | Error::CollaboratorTimeout(_)
            | Error::StaleExternalReference(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable discriminant carried next to the message in error envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAction(_) => "invalid_action",
            Error::MissingReference(_) => "missing_reference",
            Error::NotFound(_) => "not_found",
            Error::InvalidField { .. } => "invalid_field",
            Error::InvalidConfig(_) => "invalid_config",
            Error::VersionConflict { .. } => "version_conflict",
            Error::CollaboratorUnavailable(_) | Error::CollaboratorTimeout(_) => {
                "collaborator_unavailable"
            }
            Error::StaleExternalReference(_) => "stale_external_reference",
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => "operation_failed",
        }
    }

    /// Structured details for JSON output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::InvalidField { field, message } => Some(serde_json::json!({
                "field": field,
                "message": message,
            })),
            Error::VersionConflict { row, expected, stored } => Some(serde_json::json!({
                "rowIndex": row,
                "expected": expected,
                "stored": stored,
            })),
            _ => None,
        }
    }
}

/// Result type alias for taskcal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub status: &'static str,
    pub message: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            status: "error",
            message: err.to_string(),
            kind: err.kind(),
            details: err.details(),
        }
    }
}
