//! # Profile Store Error Types
//!
//! Failures of the libsql-backed user profile store.

use crate::error::Error as CrateError;
use crate::rank::SearchError;
use thiserror::Error;

/// Error type for profile store operations
#[derive(Debug, Error)]
pub enum ProfileError {
    /// LibSQL error
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// SQL query error
    #[error("SQL query error: {0}")]
    Query(String),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// A stored row could not be decoded
    #[error("Data error: {0}")]
    Data(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<ProfileError> for CrateError {
    fn from(err: ProfileError) -> Self {
        CrateError::Profile(err.to_string())
    }
}

impl From<ProfileError> for SearchError {
    fn from(err: ProfileError) -> Self {
        SearchError::Profile(err.to_string())
    }
}
