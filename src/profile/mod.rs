//! # User Profiles
//!
//! Accounts, liked papers, and search history in a libsql database, plus
//! the adapter that lets the retrieval engine read liked vectors from it.

pub mod error;
mod schema;
mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

pub use error::ProfileError;
pub use store::{HISTORY_LIMIT, ProfileStore};

use crate::index::{Corpus, VectorIndex};
use crate::rank::{SearchError, SearchSummary, UserProfile};

/// A paper a user liked, as it looked when liked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LikedPaper {
    pub paper_url: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url_pdf: Option<String>,
    pub date: Option<String>,
    pub liked_at: DateTime<Utc>,
}

/// One recorded search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHistoryEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub results_count: usize,
    pub top_result: Option<String>,
}

/// Resolves liked papers to index vectors through the corpus
#[derive(Clone)]
pub struct IndexedProfiles<I: VectorIndex> {
    store: ProfileStore,
    corpus: Arc<Corpus>,
    index: Arc<I>,
}

impl<I: VectorIndex> IndexedProfiles<I> {
    pub fn new(store: ProfileStore, corpus: Arc<Corpus>, index: Arc<I>) -> Self {
        Self {
            store,
            corpus,
            index,
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }
}

impl<I: VectorIndex> UserProfile for IndexedProfiles<I> {
    /// Liked papers no longer in the corpus are skipped
    async fn liked_vectors(&self, user: &str) -> Result<Vec<Vec<f32>>, SearchError> {
        let liked = self.store.liked_papers(user).await?;
        let vectors: Vec<Vec<f32>> = liked
            .iter()
            .filter_map(|paper| self.corpus.position_of_paper_url(&paper.paper_url))
            .filter_map(|row| self.index.vector(row).map(<[f32]>::to_vec))
            .collect();
        debug!(
            "Resolved {} of {} liked papers to vectors",
            vectors.len(),
            liked.len()
        );
        Ok(vectors)
    }

    async fn record_search(
        &self,
        user: &str,
        query: &str,
        summary: &SearchSummary,
    ) -> Result<(), SearchError> {
        self.store
            .add_search_history(user, query, summary)
            .await
            .map_err(SearchError::from)
    }
}
