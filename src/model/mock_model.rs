//! # Mock Models for Testing
//!
//! Test doubles for the external model services:
//!
//! - `MockCompletionModel`: returns a predefined completion or error
//! - `MockEmbeddingService`: deterministic vectors with scripted failures per call
//! - `MockRigEmbeddingModel`: a `rig` embedding model with trivial vectors

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use rig::{
    completion::{
        AssistantContent, CompletionError, CompletionModel, CompletionRequest, CompletionResponse,
    },
    embeddings::{Embedding, EmbeddingError, EmbeddingModel},
    one_or_many::OneOrMany,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{EmbeddingService, ServiceError};

/// A mock completion model for testing purposes.
/// It returns a predefined response or error when `completion` is called.
#[derive(Debug, Clone)]
pub struct MockCompletionModel {
    response: Arc<Mutex<Option<OneOrMany<AssistantContent>>>>,
    error: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockCompletionModel {
    /// Creates a new mock model that will return a default empty success response.
    pub fn new() -> Self {
        Self {
            response: Arc::new(Mutex::new(None)),
            error: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Sets the response that the mock model should return.
    pub async fn set_response(&self, response: OneOrMany<AssistantContent>) {
        let mut guard = self.response.lock().await;
        *guard = Some(response);
    }

    /// Helper to create a simple text response.
    pub async fn set_text_response(&self, text: &str) {
        let response = OneOrMany::one(AssistantContent::text(text));
        self.set_response(response).await;
    }

    /// Make every completion fail with a provider error.
    pub async fn set_error(&self, message: &str) {
        let mut guard = self.error.lock().await;
        *guard = Some(message.to_string());
    }

    /// Number of completions requested so far
    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

impl Default for MockCompletionModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionModel for MockCompletionModel {
    type Response = String;

    async fn completion(
        &self,
        _completion_request: CompletionRequest,
    ) -> Result<CompletionResponse<Self::Response>, CompletionError> {
        *self.calls.lock().await += 1;

        if let Some(message) = self.error.lock().await.clone() {
            return Err(CompletionError::ProviderError(message));
        }

        let response = {
            let guard = self.response.lock().await;
            guard.clone()
        };
        Ok(CompletionResponse {
            choice: response.unwrap_or_else(|| OneOrMany::one(AssistantContent::text(""))),
            raw_response: "".to_string(),
        })
    }
}

/// What a scripted call should do instead of succeeding
#[derive(Debug, Clone)]
pub enum Scripted {
    Fail(ServiceError),
    /// Return one vector fewer than requested
    Short,
    /// Never respond
    Stall,
}

/// A recorded call to [`MockEmbeddingService`]
#[derive(Debug, Clone)]
pub struct MockCall {
    pub texts: Vec<String>,
    pub at: Instant,
}

/// Embedding service with deterministic vectors and scripted misbehavior.
///
/// Calls are numbered from zero in arrival order; failed calls count too.
#[derive(Debug, Clone)]
pub struct MockEmbeddingService {
    dims: usize,
    max_batch: Option<usize>,
    script: Arc<StdMutex<HashMap<usize, Scripted>>>,
    calls: Arc<StdMutex<Vec<MockCall>>>,
}

impl MockEmbeddingService {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            max_batch: None,
            script: Arc::new(StdMutex::new(HashMap::new())),
            calls: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = Some(max_batch);
        self
    }

    /// Script the behavior of call number `call`
    pub fn script(self, call: usize, behavior: Scripted) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .insert(call, behavior);
        self
    }

    /// Fail call number `call` with `error`
    pub fn fail_on(self, call: usize, error: ServiceError) -> Self {
        self.script(call, Scripted::Fail(error))
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// The vector this mock returns for `text`
    pub fn vector_for(text: &str, dims: usize) -> Vec<f32> {
        let mut hash: u64 = 0xcbf29ce484222325;
        (0..dims)
            .map(|i| {
                for byte in text.bytes().chain(std::iter::once(i as u8)) {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x100000001b3);
                }
                ((hash >> 40) as f32 / (1u64 << 24) as f32) - 0.5
            })
            .collect()
    }
}

impl EmbeddingService for MockEmbeddingService {
    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn max_batch_size(&self) -> Option<usize> {
        self.max_batch
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let call = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push(MockCall {
                texts: texts.to_vec(),
                at: Instant::now(),
            });
            calls.len() - 1
        };
        let scripted = self.script.lock().expect("script lock").remove(&call);

        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| Self::vector_for(t, self.dims))
            .collect();
        match scripted {
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Short) => {
                vectors.pop();
                Ok(vectors)
            }
            Some(Scripted::Stall) => {
                std::future::pending::<()>().await;
                Ok(vectors)
            }
            None => Ok(vectors),
        }
    }
}

/// A `rig` embedding model whose vectors are `[text length, 1, 1, ...]`.
#[derive(Debug, Clone)]
pub struct MockRigEmbeddingModel {
    dims: usize,
    error: Option<String>,
}

impl MockRigEmbeddingModel {
    pub fn new(dims: usize) -> Self {
        Self { dims, error: None }
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }
}

impl EmbeddingModel for MockRigEmbeddingModel {
    const MAX_DOCUMENTS: usize = 8;

    fn ndims(&self) -> usize {
        self.dims
    }

    fn embed_texts(
        &self,
        texts: impl IntoIterator<Item = String> + Send,
    ) -> impl Future<Output = Result<Vec<Embedding>, EmbeddingError>> + Send {
        let result = match &self.error {
            Some(message) => Err(EmbeddingError::ProviderError(message.clone())),
            None => Ok(texts
                .into_iter()
                .map(|text| {
                    let mut vec = vec![1.0f64; self.dims];
                    if let Some(first) = vec.first_mut() {
                        *first = text.len() as f64;
                    }
                    Embedding {
                        document: text,
                        vec,
                    }
                })
                .collect()),
        };
        async move { result }
    }
}
