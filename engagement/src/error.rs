//! Engagement error types
//!
//! Only the snapshot path performs I/O in this crate, so most variants
//! describe persistence failures. Per-action problems (malformed decision
//! entries, budget denials) are values, not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engagement operations
pub type EngagementResult<T> = Result<T, EngagementError>;

/// Errors that can occur while loading or persisting engagement state
#[derive(Error, Debug)]
pub enum EngagementError {
    /// Snapshot file not found
    #[error("Snapshot not found at {path}")]
    SnapshotNotFound { path: PathBuf },

    /// Snapshot file contains invalid JSON or an unexpected shape
    #[error("Invalid snapshot at {path}: {message}")]
    InvalidSnapshot { path: PathBuf, message: String },

    /// Snapshot written by an incompatible schema version
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Writing the snapshot failed; the previous good snapshot is untouched
    #[error("Failed to persist snapshot to {path}: {message}")]
    PersistFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngagementError {
    pub fn snapshot_not_found(path: impl Into<PathBuf>) -> Self {
        Self::SnapshotNotFound { path: path.into() }
    }

    pub fn invalid_snapshot(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn persist_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PersistFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Whether the on-disk state is unusable and recovery from backup applies.
    /// Unsupported versions are not corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::InvalidSnapshot { .. })
    }
}
