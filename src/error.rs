/*!
 * Error types for the vault pipeline
 */

use cheyenne_core_interface::{BatchEntryFailure, InterfaceError};
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum VaultError {
    /// `bucket + "/" + key` would exceed the object store's key limit
    #[error("Cannot copy record, maximum key length exceeded ({length} > {limit})")]
    KeyTooLong { length: usize, limit: usize },

    /// Object is at or above the giant threshold and no overflow dispatch is configured
    #[error("Object too large to process ({size} bytes)")]
    ObjectTooLarge { size: u64 },

    /// Capability gap: the requested path exists only as a stub
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A record body could not be understood
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Object store or queue call failed for one record
    #[error("Dependency failure: {0}")]
    Dependency(#[from] InterfaceError),

    /// One or more routed envelopes could not be handed to their queue
    #[error("Failed to dispatch {} message(s) to the {tier} queue", failed.len())]
    Dispatch {
        tier: String,
        failed: Vec<BatchEntryFailure>,
    },

    /// At least one record of a batch could not be durably processed
    #[error("Failed to process one or more records ({failed} failed, {accepted} accepted)")]
    BatchPartialFailure { failed: usize, accepted: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VaultError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            VaultError::Config(_) | VaultError::Io(_) => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Permanent conditions are dead-lettered and never retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            VaultError::KeyTooLong { .. }
                | VaultError::ObjectTooLarge { .. }
                | VaultError::NotImplemented(_)
                | VaultError::MalformedRecord(_)
        )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            VaultError::KeyTooLong { .. }
            | VaultError::ObjectTooLarge { .. }
            | VaultError::MalformedRecord(_) => ErrorCategory::Validation,
            VaultError::NotImplemented(_) => ErrorCategory::Capability,
            VaultError::Dependency(_) | VaultError::Dispatch { .. } => ErrorCategory::Dependency,
            VaultError::BatchPartialFailure { .. } => ErrorCategory::Batch,
            VaultError::Config(_) => ErrorCategory::Configuration,
            VaultError::Io(_) => ErrorCategory::IoError,
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::MalformedRecord(err.to_string())
    }
}

/// Error category for log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Capability,
    Dependency,
    Batch,
    Configuration,
    IoError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Capability => write!(f, "capability"),
            ErrorCategory::Dependency => write!(f, "dependency"),
            ErrorCategory::Batch => write!(f, "batch"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
        }
    }
}
