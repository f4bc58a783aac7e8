//! Engine and runner errors.

use smol_str::SmolStr;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, DebugError>;

/// Errors reported to engine callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    /// Unknown session, breakpoint or transaction id.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind of entity that was looked up.
        kind: &'static str,
        /// Identifier that was not found.
        id: SmolStr,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(SmolStr),

    /// Malformed breakpoint, variable or configuration input.
    #[error("validation failed: {0}")]
    Validation(SmolStr),

    /// A required collaborator was not supplied.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    /// The statement runner failed.
    #[error("statement {query} failed: {error}")]
    ExecutionFailure {
        /// Ordinal of the failing statement (0 for rewind statements).
        query: u32,
        /// Error reported by the runner.
        error: RunnerError,
    },

    /// Configuration could not be loaded.
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),
}

impl DebugError {
    pub(crate) fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: SmolStr::new(id.to_string()),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<SmolStr>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn validation(message: impl Into<SmolStr>) -> Self {
        Self::Validation(message.into())
    }
}

/// Error returned by a statement runner.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct RunnerError {
    /// Human readable error text from the database.
    pub message: String,
    /// Optional SQLSTATE code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_state: Option<SmolStr>,
}

impl RunnerError {
    /// Create a runner error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
        }
    }

    /// Attach a SQLSTATE code.
    #[must_use]
    pub fn with_sql_state(mut self, code: impl Into<SmolStr>) -> Self {
        self.sql_state = Some(code.into());
        self
    }
}
