use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{
    Diversifier, Explain, NoExplainer, NoProfiles, Personalizer, RankedResult, SearchConfig,
    SearchError, SearchRequest, SearchResponse, SearchSummary, UserProfile,
};
use crate::index::{Corpus, IndexError, SearchHits, VectorIndex};
use crate::model::EmbeddingService;

/// Answers queries over a shared corpus and index.
///
/// Built once and shared; every query only reads the corpus and index.
pub struct RetrievalEngine<E, I, P = NoProfiles, X = NoExplainer> {
    embedder: E,
    index: Arc<I>,
    corpus: Arc<Corpus>,
    profiles: P,
    explainer: X,
    config: SearchConfig,
}

impl<E, I> RetrievalEngine<E, I>
where
    E: EmbeddingService,
    I: VectorIndex + 'static,
{
    pub fn new(
        embedder: E,
        index: Arc<I>,
        corpus: Arc<Corpus>,
        config: SearchConfig,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        if index.len() != corpus.len() {
            return Err(SearchError::Index(IndexError::Unavailable(format!(
                "index has {} vectors but the corpus has {} documents",
                index.len(),
                corpus.len()
            ))));
        }
        Ok(Self {
            embedder,
            index,
            corpus,
            profiles: NoProfiles,
            explainer: NoExplainer,
            config,
        })
    }
}

impl<E, I, P, X> RetrievalEngine<E, I, P, X>
where
    E: EmbeddingService,
    I: VectorIndex + 'static,
    P: UserProfile,
    X: Explain,
{
    pub fn with_profiles<P2: UserProfile>(self, profiles: P2) -> RetrievalEngine<E, I, P2, X> {
        RetrievalEngine {
            embedder: self.embedder,
            index: self.index,
            corpus: self.corpus,
            profiles,
            explainer: self.explainer,
            config: self.config,
        }
    }

    pub fn with_explainer<X2: Explain>(self, explainer: X2) -> RetrievalEngine<E, I, P, X2> {
        RetrievalEngine {
            embedder: self.embedder,
            index: self.index,
            corpus: self.corpus,
            profiles: self.profiles,
            explainer,
            config: self.config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn profiles(&self) -> &P {
        &self.profiles
    }

    /// A request for `query` with this engine's defaults
    pub fn request(&self, query: impl Into<String>) -> SearchRequest {
        SearchRequest::new(query, &self.config)
    }

    /// Run the ranking pipeline for one query.
    ///
    /// With personalization the candidate pool is widened to the
    /// personalization floor and re-sorted by blended distance. MMR then
    /// diversifies the first `fetch_k` of that re-sorted pool, so the
    /// preference decides which candidates MMR sees.
    #[instrument(skip(self, request), fields(query = %request.query, top_k = request.top_k))]
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        request.validate()?;

        let query_vector = timeout(
            self.config.embed_timeout,
            self.embedder.embed_query(&request.query),
        )
        .await
        .map_err(|_| SearchError::Timeout {
            stage: "query embedding",
            after: self.config.embed_timeout,
        })??;

        let liked = match (&request.user, request.use_personalization) {
            (Some(user), true) => self.profiles.liked_vectors(user).await?,
            _ => Vec::new(),
        };
        let personalize = !liked.is_empty();

        let mut width = if request.use_mmr {
            request.fetch_k
        } else {
            request.top_k
        };
        if personalize {
            width = width.max(self.config.personalization_floor);
        }

        let hits = self.nearest(query_vector.clone(), width).await?;
        debug!("Fetched {} candidates", hits.len());

        let mut candidates: Vec<(usize, f32)> =
            hits.indices.into_iter().zip(hits.distances).collect();
        if personalize && !candidates.is_empty() {
            let personalizer = Personalizer::new(self.config.blend_weight)?;
            let base: Vec<f32> = candidates.iter().map(|&(_, d)| d).collect();
            let adjusted = personalizer.blend(&self.candidate_vectors(&candidates)?, &base, &liked)?;
            for (candidate, distance) in candidates.iter_mut().zip(adjusted) {
                candidate.1 = distance;
            }
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
            debug!("Personalized {} candidates", candidates.len());
        }

        let selected: Vec<(usize, f32)> = if request.use_mmr {
            candidates.truncate(request.fetch_k);
            let diversifier = Diversifier::new(request.lambda, request.top_k, candidates.len())?;
            diversifier
                .select(&query_vector, &self.candidate_vectors(&candidates)?)
                .into_iter()
                .map(|position| candidates[position])
                .collect()
        } else {
            candidates.truncate(request.top_k);
            candidates
        };

        let results = selected
            .into_iter()
            .enumerate()
            .map(|(i, (row, distance))| {
                let document = self.corpus.get(row).cloned().ok_or_else(|| {
                    SearchError::Index(IndexError::Corpus(format!("no document at row {}", row)))
                })?;
                Ok(RankedResult {
                    rank: i + 1,
                    doc_index: row,
                    distance,
                    document,
                })
            })
            .collect::<Result<Vec<_>, SearchError>>()?;
        info!("Returning {} results", results.len());

        if let Some(user) = &request.user {
            let summary = SearchSummary::of(&results);
            if let Err(e) = self.profiles.record_search(user, &request.query, &summary).await {
                warn!("Failed to record search for {}: {}", user, e);
            }
        }

        let explanation = if request.explain && !results.is_empty() {
            match self.explainer.explain(&request.query, &results).await {
                Ok(explanation) => explanation,
                Err(e) => {
                    warn!("Explanation failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(SearchResponse {
            results,
            explanation,
        })
    }

    fn candidate_vectors(&self, candidates: &[(usize, f32)]) -> Result<Vec<&[f32]>, SearchError> {
        candidates
            .iter()
            .map(|&(row, _)| {
                self.index.vector(row).ok_or_else(|| {
                    SearchError::Index(IndexError::Unavailable(format!(
                        "index returned unknown row {}",
                        row
                    )))
                })
            })
            .collect()
    }

    /// Nearest-neighbor search on the blocking pool, bounded by the index timeout
    async fn nearest(&self, query: Vec<f32>, k: usize) -> Result<SearchHits, SearchError> {
        let index = Arc::clone(&self.index);
        let task = tokio::task::spawn_blocking(move || index.search(&query, k));
        let hits = timeout(self.config.index_timeout, task)
            .await
            .map_err(|_| SearchError::Timeout {
                stage: "index search",
                after: self.config.index_timeout,
            })???;
        Ok(hits)
    }
}
