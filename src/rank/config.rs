//! # Search Configuration
//!
//! Defaults for the ranking pipeline. Every value can be overridden per
//! request through [`SearchRequest`](super::SearchRequest).

use std::time::Duration;

use super::SearchError;

/// Configuration for the retrieval engine
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of results returned
    pub top_k: usize,

    /// Candidates considered by diversification
    pub fetch_k: usize,

    /// Relevance weight in diversification, in `[0, 1]`
    pub lambda: f32,

    /// Weight of the user preference distance, in `[0, 1]`
    pub blend_weight: f32,

    /// Smallest candidate pool when personalization runs
    pub personalization_floor: usize,

    pub use_mmr: bool,

    pub use_personalization: bool,

    /// Ask the completion model to explain the results
    pub explain: bool,

    /// Upper bound on embedding the query
    pub embed_timeout: Duration,

    /// Upper bound on the nearest-neighbor search
    pub index_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            fetch_k: 25,
            lambda: 0.7,
            blend_weight: 0.3,
            personalization_floor: 50,
            use_mmr: true,
            use_personalization: true,
            explain: false,
            embed_timeout: Duration::from_secs(60),
            index_timeout: Duration::from_secs(10),
        }
    }
}

impl SearchConfig {
    /// Create a new builder
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if !(0.0..=1.0).contains(&self.blend_weight) {
            return Err(SearchError::InvalidParameters(format!(
                "blend weight must be within [0, 1], got {}",
                self.blend_weight
            )));
        }
        if self.embed_timeout.is_zero() || self.index_timeout.is_zero() {
            return Err(SearchError::InvalidParameters(
                "timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for SearchConfig
#[derive(Debug, Default)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    pub fn fetch_k(mut self, fetch_k: usize) -> Self {
        self.config.fetch_k = fetch_k;
        self
    }

    pub fn lambda(mut self, lambda: f32) -> Self {
        self.config.lambda = lambda;
        self
    }

    pub fn blend_weight(mut self, blend_weight: f32) -> Self {
        self.config.blend_weight = blend_weight;
        self
    }

    pub fn personalization_floor(mut self, floor: usize) -> Self {
        self.config.personalization_floor = floor;
        self
    }

    pub fn use_mmr(mut self, use_mmr: bool) -> Self {
        self.config.use_mmr = use_mmr;
        self
    }

    pub fn use_personalization(mut self, use_personalization: bool) -> Self {
        self.config.use_personalization = use_personalization;
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.config.explain = explain;
        self
    }

    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout = timeout;
        self
    }

    pub fn index_timeout(mut self, timeout: Duration) -> Self {
        self.config.index_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SearchConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();

        assert_eq!(config.top_k, 5);
        assert_eq!(config.fetch_k, 25);
        assert_eq!(config.lambda, 0.7);
        assert_eq!(config.blend_weight, 0.3);
        assert_eq!(config.personalization_floor, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_blend_weight() {
        let config = SearchConfig::builder().blend_weight(1.5).build();
        assert!(matches!(
            config.validate(),
            Err(SearchError::InvalidParameters(_))
        ));
    }
}
