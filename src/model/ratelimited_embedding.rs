use std::sync::Arc;

use governor::DefaultDirectRateLimiter;
use tracing::{Instrument, debug_span, info_span};

use super::{EmbeddingService, ServiceError};

/// Holds every request until a fixed `governor` quota allows it.
///
/// Used on the query path, where traffic is bursty and a static budget is
/// enough. Batch ingestion uses the adaptive controller instead.
#[derive(Clone)]
pub struct RateLimitedEmbedder<S: EmbeddingService> {
    service: S,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<S> RateLimitedEmbedder<S>
where
    S: EmbeddingService,
{
    pub fn new(service: S, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            service,
            limiter: Arc::new(limiter),
        }
    }

    pub fn inner(&self) -> &S {
        &self.service
    }
}

impl<S: EmbeddingService> EmbeddingService for RateLimitedEmbedder<S> {
    fn model_name(&self) -> &str {
        self.service.model_name()
    }

    fn max_batch_size(&self) -> Option<usize> {
        self.service.max_batch_size()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.limiter.until_ready().instrument(debug_span!("limiter")).await;
        self.service
            .embed_batch(texts)
            .instrument(info_span!("embed_batch", batch = texts.len()))
            .await
    }
}
