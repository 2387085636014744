//! # Search Error Types Module
//!
//! Errors raised while answering a query. A failed query never returns a
//! partial result list.

use std::time::Duration;

use thiserror::Error;

use crate::error::Error as CrateError;
use crate::index::IndexError;
use crate::model::ServiceError;

/// Errors that can occur during search operations
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query could not be embedded
    #[error("Embedding error: {0}")]
    Embedding(#[from] ServiceError),

    /// The index or corpus failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// A stage did not finish in time
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// Invalid search parameters
    #[error("Invalid search parameters: {0}")]
    InvalidParameters(String),

    /// The user profile could not be read or updated
    #[error("Profile error: {0}")]
    Profile(String),

    /// The result explanation could not be produced
    #[error("Explanation error: {0}")]
    Explanation(String),

    /// A blocking task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl From<SearchError> for CrateError {
    fn from(err: SearchError) -> Self {
        CrateError::Search(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        SearchError::Task(format!("Search task failed: {}", err))
    }
}
