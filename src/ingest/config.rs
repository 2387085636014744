//! # Ingest Configuration
//!
//! Batch sizing, the adaptive rate envelope, the retry budget, and where
//! partial progress is persisted.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an embedding ingestion run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Records per embedding request
    pub batch_size: usize,

    /// Starting request budget in requests per minute
    pub initial_rpm: u32,

    /// Lowest budget throttling may push the rate to
    pub min_rpm: u32,

    /// Highest budget sustained success may raise the rate to
    pub max_rpm: u32,

    /// Retries per batch for throttled or transient failures
    pub max_retries: u32,

    /// Write the checkpoint after this many successful batches
    pub checkpoint_every: usize,

    /// Upper bound on one embedding request
    pub request_timeout: Duration,

    /// Where partial progress is persisted; `None` disables resume
    pub checkpoint_path: Option<PathBuf>,

    /// Seed for backoff jitter
    pub seed: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 350,
            initial_rpm: 200,
            min_rpm: 50,
            max_rpm: 500,
            max_retries: 5,
            checkpoint_every: 10,
            request_timeout: Duration::from_secs(120),
            checkpoint_path: None,
            seed: 42,
        }
    }
}

impl IngestConfig {
    /// Create a new builder
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::new()
    }
}

/// Builder for IngestConfig
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the starting, lowest, and highest request budgets
    pub fn rpm(mut self, initial: u32, min: u32, max: u32) -> Self {
        self.config.initial_rpm = initial;
        self.config.min_rpm = min;
        self.config.max_rpm = max;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn checkpoint_every(mut self, batches: usize) -> Self {
        self.config.checkpoint_every = batches;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = Some(path.into());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Build the configuration
    pub fn build(self) -> IngestConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 350);
        assert_eq!(
            (config.initial_rpm, config.min_rpm, config.max_rpm),
            (200, 50, 500)
        );
        assert_eq!(config.max_retries, 5);
        assert!(config.checkpoint_path.is_none());
    }

    #[test]
    fn test_builder() {
        let config = IngestConfig::builder()
            .batch_size(4)
            .rpm(600, 60, 1000)
            .checkpoint_path("/tmp/vectors.npy")
            .build();

        assert_eq!(config.batch_size, 4);
        assert_eq!(config.initial_rpm, 600);
        assert_eq!(config.checkpoint_path, Some(PathBuf::from("/tmp/vectors.npy")));
    }
}
