//! Error types for the volume group manager
//!
//! Provides structured error types for inventory fetching, snapshot
//! reconciliation, job execution and request preconditions.

use thiserror::Error;

/// Unified error type for the manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Inventory Errors
    // =========================================================================
    #[error("Failed to fetch inventory for volume group {group}: {reason}")]
    FetchFailed { group: String, reason: String },

    #[error("Inventory fetch for volume group {group} was superseded")]
    FetchCancelled { group: String },

    // =========================================================================
    // Reconcile Errors
    // =========================================================================
    #[error("Malformed {kind} record: missing field '{field}'")]
    MalformedRecord { kind: &'static str, field: &'static str },

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("{context}: {message}")]
    JobFailed { context: String, message: String },

    #[error("Failed to launch job {operation}: {reason}")]
    JobLaunch { operation: String, reason: String },

    #[error("Request was dropped before completion")]
    RequestAbandoned,

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Volume group not found: {name}")]
    VolumeGroupNotFound { name: String },

    #[error("The given object is not a valid block: {object_path}")]
    DeviceNotFound { object_path: String },

    #[error("Device {device} is in use: {reason}")]
    DeviceInUse { device: String, reason: String },

    #[error("Not a valid logical volume: {object_path}")]
    LogicalVolumeNotFound { object_path: String },

    #[error("Failed to wipe device {device}: {reason}")]
    WipeFailed { device: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Granularity at which an error is contained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// A single snapshot record is dropped, the pass continues
    Record,
    /// The current poll cycle is abandoned, state stays at last-known-good
    PollCycle,
    /// Only the request that triggered the error is failed
    Request,
}

impl Error {
    /// Determine how far this error propagates
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::MalformedRecord { .. } => ErrorScope::Record,

            Error::FetchFailed { .. } | Error::FetchCancelled { .. } | Error::JsonParse(_) => {
                ErrorScope::PollCycle
            }

            _ => ErrorScope::Request,
        }
    }

    /// Check if this error was raised before any job was spawned
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::VolumeGroupNotFound { .. }
                | Error::DeviceNotFound { .. }
                | Error::DeviceInUse { .. }
                | Error::LogicalVolumeNotFound { .. }
                | Error::WipeFailed { .. }
        )
    }

    /// Message reported by a failed job, if this is a job failure
    pub fn job_message(&self) -> Option<&str> {
        match self {
            Error::JobFailed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Result type alias for the manager
pub type Result<T> = std::result::Result<T, Error>;
