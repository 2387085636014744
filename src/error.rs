//! Error types for the paperscout crate

use thiserror::Error;

/// Result type for paperscout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for paperscout operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding service error
    #[error("Embedding service error: {0}")]
    Service(String),

    /// Embedding ingestion error
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Vector index or corpus error
    #[error("Index error: {0}")]
    Index(String),

    /// Search error
    #[error("Search error: {0}")]
    Search(String),

    /// User profile store error
    #[error("Profile error: {0}")]
    Profile(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
