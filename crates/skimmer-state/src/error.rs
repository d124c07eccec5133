//! Checkpoint store error types.

use std::path::PathBuf;

/// Errors produced by [`CheckpointStore`](crate::CheckpointStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Checkpoint file content did not parse as an RFC 3339 timestamp.
    #[error("unrecognized checkpoint format in file: {}", .path.display())]
    Format {
        /// Path of the offending checkpoint file.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: chrono::ParseError,
    },

    /// File-system I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
