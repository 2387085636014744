//! Error types for the ingest module

use thiserror::Error;

use crate::error::Error as CrateError;
use crate::model::ServiceError;

/// Error type for embedding ingestion.
///
/// Every variant is raised after the checkpoint has been written, so the
/// vectors computed before the failure survive it.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The service failed in a way retrying cannot fix
    #[error("Batch {batch} failed: {source}")]
    Fatal {
        batch: usize,
        #[source]
        source: ServiceError,
    },

    /// A retryable failure outlasted the retry budget
    #[error("Batch {batch} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        batch: usize,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    /// The service answered with the wrong number or shape of vectors
    #[error("Malformed embeddings for batch {batch}: {message}")]
    Malformed { batch: usize, message: String },

    /// The run was cancelled between batches
    #[error("Ingestion cancelled after {completed} of {total} records")]
    Cancelled { completed: usize, total: usize },

    /// The checkpoint file could not be read or written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for CrateError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Io(e) => CrateError::Io(e),
            _ => CrateError::Ingest(err.to_string()),
        }
    }
}
