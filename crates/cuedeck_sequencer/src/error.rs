// SPDX-License-Identifier: MIT OR Apache-2.0
//! Errors raised at the persistence boundary. The engine itself never fails.

use thiserror::Error;

/// Sequence file errors
#[derive(Debug, Error)]
pub enum SequenceError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid RON
    #[error("Failed to parse sequence: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The document could not be written as RON
    #[error("Failed to serialize sequence: {0}")]
    Serialize(#[from] ron::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by a newer format
    #[error("Sequence format version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
}

/// Result type for sequence persistence
pub type Result<T> = std::result::Result<T, SequenceError>;
