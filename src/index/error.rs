//! # Index Error Types
//!
//! Failures of the corpus and vector index layer. `Unavailable` covers a
//! missing or corrupt index file; callers recover by rebuilding the index
//! from the embedding array.

use thiserror::Error;

use crate::error::Error as CrateError;

/// Error type for index and corpus operations
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index file is missing, corrupt, or was written by another version
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// A vector does not match the index dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The corpus file could not be parsed
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IndexError> for CrateError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Io(e) => CrateError::Io(e),
            _ => CrateError::Index(err.to_string()),
        }
    }
}
