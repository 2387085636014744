//! OpenAI-compatible embedding client

use std::time::Duration;

use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};
use url::Url;

use super::{EmbeddingService, ServiceError};
use crate::error::{Error, Result};

/// Embedding client for `POST {base_url}/embeddings`.
///
/// Maps HTTP failures onto [`ServiceError`]: 429 is a throttle (honoring
/// `retry-after-ms` / `retry-after`), 408/409/5xx and network errors are
/// transient, 401/403 are authorization failures, other 4xx reject the input.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: ReqwestClient,
    endpoint: Url,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing embedding API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(Error::Config("missing embedding model name".to_string()));
        }
        let endpoint = Url::parse(&format!("{}/embeddings", base_url.trim_end_matches('/')))
            .map_err(|e| Error::Config(format!("Invalid embedding base URL: {}", e)))?;
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            dimensions: None,
            timeout,
        })
    }

    /// Request shortened embeddings from models that support it
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    async fn classify_failure(&self, response: Response) -> ServiceError {
        let status = response.status();
        let retry_after = retry_after_hint(&response);
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        error!("Embedding API error: {} - {}", status, body);

        match status {
            StatusCode::TOO_MANY_REQUESTS => ServiceError::Throttled {
                retry_after,
                message: body,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Auth(body),
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT => {
                ServiceError::Transient(format!("{}: {}", status, body))
            }
            s if s.is_server_error() => ServiceError::Transient(format!("{}: {}", status, body)),
            _ => ServiceError::InvalidInput(format!("{}: {}", status, body)),
        }
    }
}

fn retry_after_hint(response: &Response) -> Option<Duration> {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    header("retry-after-ms")
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .or_else(|| header("retry-after").map(Duration::from_secs_f64))
}

impl EmbeddingService for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, texts), fields(model = %self.model, batch = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        debug!("Sending embedding request to {}", self.endpoint);
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(self.timeout)
                } else {
                    ServiceError::Transient(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(self.classify_failure(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Transient(format!("Failed to read response: {}", e)))?;
        let mut parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ServiceError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(ServiceError::MalformedResponse(format!(
                "service returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
