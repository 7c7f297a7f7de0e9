//! Normalized errors reported by hypervisor drivers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a driver may report for any operation.
///
/// Every hypervisor technology maps its native failures onto these four
/// variants so the engine can react uniformly.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DriverError {
    /// The hypervisor could not be reached (or did not answer in time).
    #[error("Hypervisor unreachable: {0}")]
    Unreachable(String),

    /// The VM the operation targets no longer exists on the hypervisor.
    #[error("VM not found on hypervisor: {0}")]
    ResourceMissing(String),

    /// The hypervisor refused the request.
    #[error("Rejected by hypervisor: {0}")]
    RejectedByHypervisor(String),

    /// A temporary failure; repeating the same call may succeed.
    #[error("Transient hypervisor failure: {0}")]
    Transient(String),
}

impl DriverError {
    /// Whether the engine may repeat the call within the same command.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
