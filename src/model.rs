//! # Model Provider Module
//!
//! This module defines the seam between paperscout and the external model
//! services: the embedding service used for corpus ingestion and query
//! embedding, and the completion model used to explain ranked results.
//!
//! ## Key Components
//!
//! - `EmbeddingService`: ordered batch of strings in, ordered vectors out
//! - `OpenAiEmbedder`: OpenAI-compatible HTTP embedding client
//! - `RigEmbedder`: adapts any `rig` embedding model (Gemini, ...)
//! - `RateLimitedEmbedder` / `RateLimitedCompletionModel`: fixed `governor` quotas
//! - `ServiceError`: throttle / transient / fatal classification of failures
//! - `Client`: bundles the completion model and the query embedder
//!
//! Ingestion does not use the fixed quotas; it paces itself with the adaptive
//! controller in `crate::ingest`.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use rig::{completion::CompletionModel, providers::gemini};

use crate::config::Settings;
use crate::error::{Error, Result};

mod error;
#[cfg(test)]
pub(crate) mod mock_model;
pub mod openai;
pub mod ratelimited_completion;
pub mod ratelimited_embedding;
pub mod rig_embedder;

pub use error::ServiceError;
pub use openai::OpenAiEmbedder;
pub use ratelimited_completion::RateLimitedCompletionModel;
pub use ratelimited_embedding::RateLimitedEmbedder;
pub use rig_embedder::RigEmbedder;

/// Requests per minute allowed for interactive query embeddings
const QUERY_EMBEDDINGS_PER_MINUTE: u32 = 1000;

/// Requests per minute allowed for explanation completions
const COMPLETIONS_PER_MINUTE: u32 = 60;

/// An external text embedding capability.
///
/// Implementations must return exactly one vector per input, in input order,
/// or an error classified by [`ServiceError`].
pub trait EmbeddingService: Send + Sync {
    /// Identifier of the underlying model
    fn model_name(&self) -> &str;

    /// Largest batch the service accepts in one request, if it has a limit
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    /// Embed an ordered batch of texts
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = std::result::Result<Vec<Vec<f32>>, ServiceError>> + Send;

    /// Embed a single query string
    fn embed_query(
        &self,
        text: &str,
    ) -> impl Future<Output = std::result::Result<Vec<f32>, ServiceError>> + Send {
        let texts = vec![text.to_string()];
        async move {
            let mut vectors = self.embed_batch(&texts).await?;
            match (vectors.pop(), vectors.is_empty()) {
                (Some(vector), true) => Ok(vector),
                _ => Err(ServiceError::MalformedResponse(
                    "expected exactly one embedding for the query".to_string(),
                )),
            }
        }
    }
}

/// Completion model plus query embedder, constructed once and shared.
#[derive(Debug, Clone)]
pub struct Client<C, E>
where
    C: CompletionModel,
    E: EmbeddingService,
{
    completion_model: C,
    embedding: E,
}

impl<C, E> Client<C, E>
where
    C: CompletionModel,
    E: EmbeddingService,
{
    pub fn new(completion_model: C, embedding: E) -> Self {
        Self {
            completion_model,
            embedding,
        }
    }

    pub fn completion(&self) -> &C {
        &self.completion_model
    }

    pub fn embedding(&self) -> &E {
        &self.embedding
    }

    pub fn into_parts(self) -> (C, E) {
        (self.completion_model, self.embedding)
    }
}

fn per_minute(limit: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(limit.max(1)).unwrap_or(NonZeroU32::MIN))
}

/// Build a client backed by an OpenAI-compatible API.
pub fn openai_client(
    settings: &Settings,
    timeout: Duration,
) -> Result<
    Client<
        RateLimitedCompletionModel<impl CompletionModel + Clone>,
        RateLimitedEmbedder<OpenAiEmbedder>,
    >,
> {
    let api_key = settings.require_openai_key()?;
    let rig_client = rig::providers::openai::Client::from_url(api_key, &settings.openai_base_url);
    let completion_model = RateLimitedCompletionModel::per_minute(
        rig_client.completion_model(&settings.chat_model),
        COMPLETIONS_PER_MINUTE,
    );
    let embedder = OpenAiEmbedder::new(
        api_key,
        &settings.openai_base_url,
        &settings.embed_model,
        timeout,
    )?;
    let embedding = RateLimitedEmbedder::new(
        embedder,
        RateLimiter::direct(per_minute(QUERY_EMBEDDINGS_PER_MINUTE)),
    );
    Ok(Client::new(completion_model, embedding))
}

/// Build a client backed by Gemini through `rig`.
pub fn gemini_client(
    settings: &Settings,
) -> Result<
    Client<
        RateLimitedCompletionModel<gemini::completion::CompletionModel>,
        RateLimitedEmbedder<RigEmbedder<gemini::embedding::EmbeddingModel>>,
    >,
> {
    let api_key = settings.require_gemini_key()?;
    let gemini_client = gemini::Client::new(api_key);
    let completion_model = RateLimitedCompletionModel::per_minute(
        gemini_client.completion_model("gemini-2.0-flash"),
        COMPLETIONS_PER_MINUTE,
    );
    let embedding = RateLimitedEmbedder::new(
        gemini_embedder(&gemini_client),
        RateLimiter::direct(per_minute(QUERY_EMBEDDINGS_PER_MINUTE)),
    );
    Ok(Client::new(completion_model, embedding))
}

/// Unthrottled Gemini embedder for ingestion, which paces itself.
pub fn gemini_embedder(
    gemini_client: &gemini::Client,
) -> RigEmbedder<gemini::embedding::EmbeddingModel> {
    RigEmbedder::new(
        gemini_client.embedding_model(gemini::embedding::EMBEDDING_004),
        gemini::embedding::EMBEDDING_004,
    )
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Error::Service(err.to_string())
    }
}
