//! Error types for the orchestration core.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use univor_driver::DriverError;

/// Errors that can occur in tree, resolver, lifecycle and engine operations.
#[derive(Error, Debug)]
pub enum UnivorError {
    /// Malformed or incomplete definition, path or parameter.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Operation not legal in the current lifecycle state, or an edit of a
    /// parameter tier that is frozen in that state.
    #[error("Invalid state: {0}")]
    State(String),

    /// Name collision, or a rename attempted while not Provisioned.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A path segment or command id does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Folder removal while children remain.
    #[error("Folder not empty: {0}")]
    NotEmpty(String),

    /// Normalized failure reported by a driver.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Storage collaborator failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error (poisoned lock, broken invariant).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, UnivorError>;

/// Error category, stable across the serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    State,
    Conflict,
    NotFound,
    NotEmpty,
    Unreachable,
    ResourceMissing,
    RejectedByHypervisor,
    Transient,
    Storage,
    Internal,
}

impl UnivorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnivorError::Validation(_) => ErrorKind::Validation,
            UnivorError::State(_) => ErrorKind::State,
            UnivorError::Conflict(_) => ErrorKind::Conflict,
            UnivorError::NotFound(_) => ErrorKind::NotFound,
            UnivorError::NotEmpty(_) => ErrorKind::NotEmpty,
            UnivorError::Driver(e) => match e {
                DriverError::Unreachable(_) => ErrorKind::Unreachable,
                DriverError::ResourceMissing(_) => ErrorKind::ResourceMissing,
                DriverError::RejectedByHypervisor(_) => ErrorKind::RejectedByHypervisor,
                DriverError::Transient(_) => ErrorKind::Transient,
            },
            UnivorError::Storage(_) => ErrorKind::Storage,
            UnivorError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error summary stored in command results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&UnivorError> for ErrorInfo {
    fn from(err: &UnivorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<UnivorError> for ErrorInfo {
    fn from(err: UnivorError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub(crate) fn poisoned<T>(_: T) -> UnivorError {
    UnivorError::Internal("Lock poisoned".to_string())
}
