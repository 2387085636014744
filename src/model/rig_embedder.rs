use rig::embeddings::{Embedding, EmbeddingModel};
use tracing::{debug, instrument};

use super::{EmbeddingService, ServiceError};

/// Exposes any `rig` embedding model as an [`EmbeddingService`].
///
/// `rig` only reports errors as text, so failures are classified with
/// [`ServiceError::from_message`].
#[derive(Clone)]
pub struct RigEmbedder<M: EmbeddingModel> {
    model: M,
    name: String,
}

impl<M: EmbeddingModel> RigEmbedder<M> {
    pub fn new(model: M, name: impl Into<String>) -> Self {
        Self {
            model,
            name: name.into(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.model.ndims()
    }
}

impl<M: EmbeddingModel> EmbeddingService for RigEmbedder<M> {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(M::MAX_DOCUMENTS)
    }

    #[instrument(skip(self, texts), fields(model = %self.name, batch = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self
            .model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| ServiceError::from_message(e.to_string()))?;
        debug!("Received {} embeddings", embeddings.len());

        if embeddings.len() != texts.len() {
            return Err(ServiceError::MalformedResponse(format!(
                "service returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings.iter().map(single_precision).collect())
    }
}

/// `rig` carries `f64` components; indexes and checkpoints store `f32`
fn single_precision(embedding: &Embedding) -> Vec<f32> {
    embedding.vec.iter().map(|v| *v as f32).collect()
}
