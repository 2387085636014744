//! # Retrieval and Ranking
//!
//! Answers a text query against the corpus:
//! embed the query, fetch nearest candidates, optionally blend in the user's
//! preferences, optionally diversify, then map rows back to documents.
//!
//! ## Key Components
//!
//! - `RetrievalEngine`: the query pipeline over shared corpus and index
//! - `Diversifier`: maximal marginal relevance selection
//! - `Personalizer`: preference-vector blending of candidate distances
//! - `Explainer`: optional Markdown explanation from a completion model
//! - `UserProfile`: where liked vectors come from and searches are recorded

pub mod config;
mod engine;
pub mod error;
mod explain;
mod mmr;
mod personalize;

use std::future::Future;

use serde::Serialize;

pub use config::SearchConfig;
pub use engine::RetrievalEngine;
pub use error::SearchError;
pub use explain::{Explain, Explainer, NoExplainer, clip};
pub use mmr::Diversifier;
pub use personalize::{Personalizer, preference_vector};

use crate::index::DocumentRecord;

/// A single query with its ranking options
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub fetch_k: usize,
    pub lambda: f32,
    pub use_mmr: bool,
    pub use_personalization: bool,
    pub user: Option<String>,
    pub explain: bool,
}

impl SearchRequest {
    /// A request for `query` using the defaults in `config`
    pub fn new(query: impl Into<String>, config: &SearchConfig) -> Self {
        Self {
            query: query.into(),
            top_k: config.top_k,
            fetch_k: config.fetch_k,
            lambda: config.lambda,
            use_mmr: config.use_mmr,
            use_personalization: config.use_personalization,
            user: None,
            explain: config.explain,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn fetch_k(mut self, fetch_k: usize) -> Self {
        self.fetch_k = fetch_k;
        self
    }

    pub fn lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn use_mmr(mut self, use_mmr: bool) -> Self {
        self.use_mmr = use_mmr;
        self
    }

    pub fn use_personalization(mut self, use_personalization: bool) -> Self {
        self.use_personalization = use_personalization;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.query.trim().is_empty() {
            return Err(SearchError::InvalidParameters("query is empty".to_string()));
        }
        if self.top_k == 0 {
            return Err(SearchError::InvalidParameters(
                "top_k must be at least 1".to_string(),
            ));
        }
        if self.use_mmr {
            if self.fetch_k == 0 {
                return Err(SearchError::InvalidParameters(
                    "fetch_k must be at least 1".to_string(),
                ));
            }
            if !(0.0..=1.0).contains(&self.lambda) {
                return Err(SearchError::InvalidParameters(format!(
                    "lambda must be within [0, 1], got {}",
                    self.lambda
                )));
            }
        }
        Ok(())
    }
}

/// One ranked document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    /// 1-based position in the result list
    pub rank: usize,
    /// Corpus row
    pub doc_index: usize,
    /// Index distance, blended with the user's preference when personalized
    pub distance: f32,
    pub document: DocumentRecord,
}

/// Ranked results plus the optional explanation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    pub explanation: Option<String>,
}

/// What is recorded about a finished search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub results_count: usize,
    pub top_title: Option<String>,
}

impl SearchSummary {
    pub fn of(results: &[RankedResult]) -> Self {
        Self {
            results_count: results.len(),
            top_title: results.first().map(|r| r.document.title.clone()),
        }
    }
}

/// Per-user state consulted and updated by the engine
pub trait UserProfile: Send + Sync {
    /// Embeddings of the user's liked documents, in like order
    fn liked_vectors(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, SearchError>> + Send;

    fn record_search(
        &self,
        user: &str,
        query: &str,
        summary: &SearchSummary,
    ) -> impl Future<Output = Result<(), SearchError>> + Send;
}

/// Profile source for anonymous searches
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProfiles;

impl UserProfile for NoProfiles {
    async fn liked_vectors(&self, _user: &str) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(Vec::new())
    }

    async fn record_search(
        &self,
        _user: &str,
        _query: &str,
        _summary: &SearchSummary,
    ) -> Result<(), SearchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_and_validation() {
        let config = SearchConfig::default();
        let request = SearchRequest::new("transformers", &config);
        assert_eq!(request.top_k, 5);
        assert_eq!(request.fetch_k, 25);
        assert!(request.validate().is_ok());

        assert!(request.clone().top_k(0).validate().is_err());
        assert!(request.clone().lambda(1.2).validate().is_err());
        assert!(request.clone().lambda(1.2).use_mmr(false).validate().is_ok());
        assert!(SearchRequest::new("  ", &config).validate().is_err());
    }

    #[test]
    fn test_summary() {
        let result = RankedResult {
            rank: 1,
            doc_index: 3,
            distance: 0.1,
            document: DocumentRecord {
                title: "Top".to_string(),
                ..Default::default()
            },
        };
        assert_eq!(
            SearchSummary::of(&[result]),
            SearchSummary {
                results_count: 1,
                top_title: Some("Top".to_string())
            }
        );
        assert_eq!(SearchSummary::of(&[]).top_title, None);
    }
}
