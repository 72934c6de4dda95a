//! Error taxonomy for the assembly engine.
//!
//! Every public operation returns [`Result`], so callers can branch on the
//! outcome without catching anything. [`Error::kind`] groups variants into the
//! four classes the engine distinguishes:
//!
//! | Kind | Meaning | Retry? |
//! |------|---------|--------|
//! | `configuration` | Missing base path, missing database settings | Never, fatal at startup |
//! | `validation` | Unknown repository, malformed id, rejected query | Caller must fix input |
//! | `resource` | Unreadable file, git failure, broken record | Unit is skipped |
//! | `external_dependency` | Database unreachable or failing | Caller decides |

use serde::Serialize;

/// Errors produced by the scanner, introspector, relevance engine, and context manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record format error: {0}")]
    Format(String),

    #[error("manifest parse error: {0}")]
    Manifest(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classes, used to decide whether a failure is fatal,
/// the caller's fault, or isolated to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Resource,
    ExternalDependency,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Validation(_) | Error::QueryRejected(_) | Error::NotFound(_) => {
                ErrorKind::Validation
            }
            Error::Database(_) => ErrorKind::ExternalDependency,
            Error::Io(_)
            | Error::Serialization(_)
            | Error::Format(_)
            | Error::Manifest(_)
            | Error::Git(_)
            | Error::Task(_) => ErrorKind::Resource,
        }
    }
}

/// Structured error payload handed to the outer (HTTP/agent) layer.
///
/// Serializes as `{"status": "error", "error": "<message>", "kind": "<kind>"}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub status: &'static str,
    pub error: String,
    pub kind: ErrorKind,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        Self {
            status: "error",
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::Config("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::QueryRejected("DROP".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::Git("boom".into()).kind(), ErrorKind::Resource);
        assert_eq!(
            Error::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::ExternalDependency
        );
    }

    #[test]
    fn test_payload_shape() {
        let err = Error::NotFound("repository 'billing'".into());
        let payload = serde_json::to_value(ErrorPayload::from(&err)).unwrap();
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error"], "repository 'billing' not found");
        assert_eq!(payload["kind"], "validation");
    }
}
