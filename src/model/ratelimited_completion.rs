use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rig::completion::{CompletionError, CompletionModel, CompletionRequest, CompletionResponse};
use tracing::{Instrument, debug, debug_span, info_span};

/// Raw provider response, kept opaque behind the limiter
pub struct RateLimitResponse<T> {
    #[allow(dead_code)]
    response: T,
}

/// Completion model that waits for a fixed `governor` quota before each call.
///
/// Explanations are the only completions paperscout sends, one per search.
#[derive(Clone)]
pub struct RateLimitedCompletionModel<M: CompletionModel> {
    model: M,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<M> RateLimitedCompletionModel<M>
where
    M: CompletionModel,
{
    pub fn new(model: M, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            model,
            limiter: Arc::new(limiter),
        }
    }

    /// Allow `requests` completions per minute; zero is treated as one
    pub fn per_minute(model: M, requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
        Self::new(model, RateLimiter::direct(quota))
    }

    pub fn inner(&self) -> &M {
        &self.model
    }
}

impl<M: CompletionModel> CompletionModel for RateLimitedCompletionModel<M> {
    type Response = RateLimitResponse<M::Response>;

    async fn completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse<Self::Response>, CompletionError> {
        if self.limiter.check().is_err() {
            debug!("Completion quota exhausted, waiting");
            self.limiter.until_ready().instrument(debug_span!("limiter")).await;
        }
        let CompletionResponse {
            choice,
            raw_response,
        } = self
            .model
            .completion(request)
            .instrument(info_span!("completion"))
            .await?;
        Ok(CompletionResponse {
            choice,
            raw_response: RateLimitResponse {
                response: raw_response,
            },
        })
    }
}
