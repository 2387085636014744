//! # Corpus and Vector Index
//!
//! The document corpus and the nearest-neighbor index over its embeddings.
//! Row `i` of the index always holds the embedding of corpus document `i`.
//!
//! ## Key Components
//!
//! - `VectorIndex`: k-nearest-neighbor contract used by the retrieval engine
//! - `FlatIndex`: exact search by squared L2 or cosine distance, persisted to disk
//! - `Corpus` / `DocumentRecord`: documents loaded from JSON Lines

mod corpus;
pub mod error;
mod flat;

pub use corpus::{Corpus, DocumentRecord};
pub use error::IndexError;
pub use flat::{FlatIndex, Metric};

use crate::ingest::EmbeddingMatrix;

/// Nearest neighbors of a query, closest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub distances: Vec<f32>,
    pub indices: Vec<usize>,
}

impl SearchHits {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// An index over fixed-dimension vectors addressed by insertion position
pub trait VectorIndex: Send + Sync {
    /// Number of stored vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension; zero while empty
    fn dims(&self) -> usize;

    /// Append vectors; new rows continue the existing numbering
    fn add(&mut self, vectors: &EmbeddingMatrix) -> Result<(), IndexError>;

    /// The `k` nearest stored vectors, ascending by distance
    fn search(&self, query: &[f32], k: usize) -> Result<SearchHits, IndexError>;

    /// Stored vector at `index`
    fn vector(&self, index: usize) -> Option<&[f32]>;
}
