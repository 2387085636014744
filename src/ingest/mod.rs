//! # Embedding Ingestion
//!
//! Turns an ordered list of text records into one embedding per record using
//! a rate-limited external embedding service.
//!
//! ## Key Components
//!
//! - `EmbeddingBatcher`: batches records, paces and retries requests, checkpoints
//! - `RateController`: adaptive requests-per-minute budget and backoff
//! - `Checkpoint`: atomic `.npy` persistence of the vectors computed so far
//! - `EmbeddingMatrix`: row-major vector storage shared with the index
//!
//! At most one request is in flight. A run that fails or is cancelled leaves
//! a checkpoint whose rows are a prefix of the record order, and the next run
//! resumes from it.

mod checkpoint;
pub mod config;
pub mod error;
mod matrix;
mod rate;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

pub use checkpoint::{Checkpoint, read_npy, write_npy};
pub use config::IngestConfig;
pub use error::IngestError;
pub use matrix::EmbeddingMatrix;
pub use rate::{RateController, RateState};

use crate::model::{EmbeddingService, ServiceError};

/// One text to embed; `id` is its position in the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    pub id: usize,
    pub content: String,
}

impl TextRecord {
    pub fn new(id: usize, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
        }
    }
}

/// Progress events emitted during a run
#[derive(Debug, Clone, PartialEq)]
pub enum IngestProgress {
    Started { total: usize, resumed_from: usize },
    Batch { completed: usize, total: usize, rpm: u32 },
    Retrying { batch: usize, attempt: u32, delay: Duration },
    Checkpointed { rows: usize },
}

/// Cooperative cancellation, observed between batches
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct EmbeddingRun {
    /// One vector per record, in record order
    pub vectors: EmbeddingMatrix,
    /// Rows taken from an existing checkpoint
    pub resumed_from: usize,
    /// Batches sent during this run
    pub batches: usize,
    /// Failed attempts that were retried
    pub retries: u32,
    /// Pacing state at the end of the run
    pub final_rate: RateState,
}

/// Embeds records in order through an [`EmbeddingService`].
pub struct EmbeddingBatcher<S: EmbeddingService> {
    service: S,
    config: IngestConfig,
    progress: Option<mpsc::Sender<IngestProgress>>,
    cancel: CancelToken,
}

impl<S: EmbeddingService> EmbeddingBatcher<S> {
    pub fn new(service: S, config: IngestConfig) -> Self {
        Self {
            service,
            config,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_progress(mut self, sender: mpsc::Sender<IngestProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests are capped by what the service accepts in one call
    fn batch_size(&self) -> usize {
        let configured = self.config.batch_size.max(1);
        match self.service.max_batch_size() {
            Some(limit) => configured.min(limit.max(1)),
            None => configured,
        }
    }

    async fn report(&self, event: IngestProgress) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(event).await;
        }
    }

    fn save(
        &self,
        checkpoint: Option<&Checkpoint>,
        vectors: &EmbeddingMatrix,
    ) -> Result<(), IngestError> {
        if let Some(checkpoint) = checkpoint {
            checkpoint.save(vectors)?;
        }
        Ok(())
    }

    /// Embed `records`, returning one vector per record in the same order.
    ///
    /// A checkpoint with no more rows than `records` is treated as the
    /// already-embedded prefix. On any error the checkpoint holds every
    /// vector computed before it.
    #[instrument(skip_all, fields(model = self.service.model_name(), records = records.len()))]
    pub async fn embed(&self, records: &[TextRecord]) -> Result<EmbeddingRun, IngestError> {
        let total = records.len();
        let checkpoint = self.config.checkpoint_path.as_ref().map(Checkpoint::new);

        let mut vectors = match checkpoint.as_ref().map(Checkpoint::load).transpose() {
            Ok(Some(Some(existing))) if existing.len() <= total => existing,
            Ok(Some(Some(existing))) => {
                warn!(
                    "Checkpoint has {} rows for {} records, starting fresh",
                    existing.len(),
                    total
                );
                EmbeddingMatrix::new()
            }
            Ok(_) => EmbeddingMatrix::new(),
            Err(e) => {
                warn!("Ignoring unreadable checkpoint: {}", e);
                EmbeddingMatrix::new()
            }
        };
        let mut resumed_from = vectors.len();

        let mut rate = RateController::new(
            self.config.initial_rpm,
            self.config.min_rpm,
            self.config.max_rpm,
            self.config.seed,
        );
        let mut run = EmbeddingRun {
            vectors: EmbeddingMatrix::new(),
            resumed_from,
            batches: 0,
            retries: 0,
            final_rate: rate.state().clone(),
        };

        if resumed_from == total {
            info!("Checkpoint already covers all {} records", total);
            run.vectors = vectors;
            return Ok(run);
        }
        if resumed_from > 0 {
            info!("Resuming from record {} of {}", resumed_from, total);
        }
        self.report(IngestProgress::Started {
            total,
            resumed_from,
        })
        .await;

        let batch_size = self.batch_size();
        let mut cursor = resumed_from;
        let mut since_checkpoint = 0;

        while cursor < total {
            if self.cancel.is_cancelled() {
                warn!("Cancelled with {} of {} records embedded", cursor, total);
                self.save(checkpoint.as_ref(), &vectors)?;
                return Err(IngestError::Cancelled {
                    completed: cursor,
                    total,
                });
            }

            let end = (cursor + batch_size).min(total);
            let batch = run.batches;
            let texts: Vec<String> = records[cursor..end]
                .iter()
                .map(|r| r.content.clone())
                .collect();

            let embedded = match self.dispatch(&mut rate, &texts, batch, &mut run.retries).await {
                Ok(embedded) => embedded,
                Err(e) => {
                    self.save(checkpoint.as_ref(), &vectors)?;
                    return Err(e);
                }
            };

            if embedded.len() != texts.len() {
                self.save(checkpoint.as_ref(), &vectors)?;
                return Err(IngestError::Malformed {
                    batch,
                    message: format!(
                        "received {} vectors for {} texts",
                        embedded.len(),
                        texts.len()
                    ),
                });
            }

            let width = embedded.first().map(Vec::len).unwrap_or_default();
            if !vectors.is_empty() && width != vectors.dims() && cursor == resumed_from {
                warn!(
                    "Checkpoint vectors have {} dimensions but the service returns {}, starting fresh",
                    vectors.dims(),
                    width
                );
                vectors.clear();
                cursor = 0;
                resumed_from = 0;
                run.resumed_from = 0;
                continue;
            }

            for row in &embedded {
                if let Err(message) = vectors.push_row(row) {
                    vectors = truncate_rows(vectors, cursor);
                    self.save(checkpoint.as_ref(), &vectors)?;
                    return Err(IngestError::Malformed { batch, message });
                }
            }

            cursor = end;
            run.batches += 1;
            since_checkpoint += 1;
            debug!(batch, completed = cursor, rpm = rate.current_rpm(), "Batch embedded");
            self.report(IngestProgress::Batch {
                completed: cursor,
                total,
                rpm: rate.current_rpm(),
            })
            .await;

            if since_checkpoint >= self.config.checkpoint_every.max(1) && cursor < total {
                self.save(checkpoint.as_ref(), &vectors)?;
                since_checkpoint = 0;
                self.report(IngestProgress::Checkpointed { rows: cursor }).await;
            }
        }

        self.save(checkpoint.as_ref(), &vectors)?;
        self.report(IngestProgress::Checkpointed { rows: vectors.len() })
            .await;
        info!(
            "Embedded {} records in {} batches with {} retries",
            total, run.batches, run.retries
        );

        run.vectors = vectors;
        run.final_rate = rate.state().clone();
        Ok(run)
    }

    /// Send one batch, retrying throttled and transient failures
    async fn dispatch(
        &self,
        rate: &mut RateController,
        texts: &[String],
        batch: usize,
        retries: &mut u32,
    ) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut attempt: u32 = 0;
        loop {
            rate.wait_turn().await;
            let request = self.service.embed_batch(texts);
            let result = match timeout(self.config.request_timeout, request).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.config.request_timeout)),
            };

            let error = match result {
                Ok(embedded) => {
                    rate.on_success();
                    return Ok(embedded);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                rate.on_failure(false, None);
                return Err(IngestError::Fatal {
                    batch,
                    source: error,
                });
            }

            attempt += 1;
            let delay = rate.on_failure(error.is_throttle(), error.retry_after());
            if attempt > self.config.max_retries {
                return Err(IngestError::RetriesExhausted {
                    batch,
                    attempts: attempt,
                    source: error,
                });
            }

            *retries += 1;
            warn!(
                batch,
                attempt,
                ?delay,
                rpm = rate.current_rpm(),
                "Embedding request failed, retrying: {}",
                error
            );
            self.report(IngestProgress::Retrying {
                batch,
                attempt,
                delay,
            })
            .await;
            sleep(delay).await;
        }
    }
}

/// Keep only the first `rows` rows
fn truncate_rows(vectors: EmbeddingMatrix, rows: usize) -> EmbeddingMatrix {
    let dims = vectors.dims();
    let mut data = vectors.as_flat().to_vec();
    data.truncate(rows * dims);
    EmbeddingMatrix::from_flat(dims, data).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock_model::{MockEmbeddingService, Scripted};
    use tempfile::tempdir;
    use tokio::time::Instant;

    fn records(n: usize) -> Vec<TextRecord> {
        (0..n).map(|i| TextRecord::new(i, format!("text {}", i))).collect()
    }

    fn expected(records: &[TextRecord], dims: usize) -> EmbeddingMatrix {
        let rows: Vec<Vec<f32>> = records
            .iter()
            .map(|r| MockEmbeddingService::vector_for(&r.content, dims))
            .collect();
        EmbeddingMatrix::from_rows(&rows).unwrap()
    }

    fn throttle(hint: Option<Duration>) -> ServiceError {
        ServiceError::Throttled {
            retry_after: hint,
            message: "rate limit".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_lowers_rate_and_honors_hint() {
        let service = MockEmbeddingService::new(4).fail_on(1, throttle(Some(Duration::from_secs(2))));
        let config = IngestConfig::builder()
            .batch_size(4)
            .rpm(600, 60, 1000)
            .build();
        let batcher = EmbeddingBatcher::new(service.clone(), config);
        let input = records(10);

        let run = batcher.embed(&input).await.unwrap();

        assert_eq!(run.vectors, expected(&input, 4));
        assert_eq!(run.batches, 3);
        assert_eq!(run.retries, 1);
        assert_eq!(run.final_rate.current_rpm, 360);

        let calls = service.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1].texts, calls[2].texts);
        assert!(calls[2].at - calls[1].at >= Duration::from_secs(2));
        assert_eq!(calls[3].texts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced_by_rate() {
        let service = MockEmbeddingService::new(2);
        let config = IngestConfig::builder().batch_size(1).rpm(120, 60, 1000).build();
        let batcher = EmbeddingBatcher::new(service.clone(), config);

        batcher.embed(&records(3)).await.unwrap();

        let calls = service.calls();
        for pair in calls.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let service = MockEmbeddingService::new(3)
            .fail_on(0, ServiceError::Transient("502".to_string()))
            .fail_on(1, ServiceError::Timeout(Duration::from_secs(1)));
        let batcher = EmbeddingBatcher::new(service.clone(), IngestConfig::default());
        let input = records(5);

        let run = batcher.embed(&input).await.unwrap();

        assert_eq!(run.vectors, expected(&input, 3));
        assert_eq!(run.retries, 2);
        assert_eq!(run.final_rate.current_rpm, 200);
        assert_eq!(service.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_fatal_without_retry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let service = MockEmbeddingService::new(3).fail_on(1, ServiceError::Auth("bad key".to_string()));
        let config = IngestConfig::builder()
            .batch_size(2)
            .checkpoint_path(&path)
            .build();
        let input = records(6);

        let err = EmbeddingBatcher::new(service.clone(), config)
            .embed(&input)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Fatal { batch: 1, .. }));
        assert_eq!(service.calls().len(), 2);
        let saved = Checkpoint::new(&path).load().unwrap().unwrap();
        assert_eq!(saved, expected(&input[..2], 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let mut service = MockEmbeddingService::new(2);
        for call in 1..=3 {
            service = service.fail_on(call, throttle(None));
        }
        let config = IngestConfig::builder()
            .batch_size(3)
            .max_retries(2)
            .checkpoint_path(&path)
            .build();
        let input = records(9);

        let err = EmbeddingBatcher::new(service.clone(), config)
            .embed(&input)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::RetriesExhausted {
                batch: 1,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(service.calls().len(), 4);
        let saved = Checkpoint::new(&path).load().unwrap().unwrap();
        assert_eq!(saved.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_matches_uninterrupted_run() {
        let input = records(10);

        let uninterrupted = EmbeddingBatcher::new(
            MockEmbeddingService::new(4),
            IngestConfig::builder().batch_size(3).build(),
        )
        .embed(&input)
        .await
        .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let failing = MockEmbeddingService::new(4).fail_on(2, ServiceError::Auth("revoked".to_string()));
        let config = IngestConfig::builder()
            .batch_size(3)
            .checkpoint_path(&path)
            .build();
        assert!(EmbeddingBatcher::new(failing, config.clone())
            .embed(&input)
            .await
            .is_err());

        let service = MockEmbeddingService::new(4);
        let resumed = EmbeddingBatcher::new(service.clone(), config)
            .embed(&input)
            .await
            .unwrap();

        assert_eq!(resumed.resumed_from, 6);
        assert_eq!(resumed.vectors, uninterrupted.vectors);
        assert_eq!(service.calls()[0].texts[0], "text 6");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_checkpoint_returns_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let input = records(3);
        Checkpoint::new(&path).save(&expected(&input, 2)).unwrap();

        let service = MockEmbeddingService::new(2);
        let run = EmbeddingBatcher::new(service.clone(), IngestConfig::builder().checkpoint_path(&path).build())
            .embed(&input)
            .await
            .unwrap();

        assert_eq!(run.resumed_from, 3);
        assert_eq!(run.vectors.len(), 3);
        assert!(service.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_checkpoint_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        Checkpoint::new(&path).save(&expected(&records(5), 2)).unwrap();

        let input = records(2);
        let run = EmbeddingBatcher::new(
            MockEmbeddingService::new(2),
            IngestConfig::builder().checkpoint_path(&path).build(),
        )
        .embed(&input)
        .await
        .unwrap();

        assert_eq!(run.resumed_from, 0);
        assert_eq!(run.vectors, expected(&input, 2));
        assert_eq!(Checkpoint::new(&path).load().unwrap().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dimension_change_restarts_from_scratch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let input = records(4);
        Checkpoint::new(&path).save(&expected(&input[..2], 8)).unwrap();

        let service = MockEmbeddingService::new(3);
        let run = EmbeddingBatcher::new(
            service.clone(),
            IngestConfig::builder().batch_size(2).checkpoint_path(&path).build(),
        )
        .embed(&input)
        .await
        .unwrap();

        assert_eq!(run.resumed_from, 0);
        assert_eq!(run.vectors, expected(&input, 3));
        assert_eq!(service.calls()[1].texts[0], "text 0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_response_is_fatal() {
        let service = MockEmbeddingService::new(2).script(0, Scripted::Short);
        let err = EmbeddingBatcher::new(service, IngestConfig::default())
            .embed(&records(3))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Malformed { batch: 0, .. }));
    }

    #[tokio::test]
    async fn test_cancel_between_batches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let (tx, mut rx) = mpsc::channel(32);
        let batcher = EmbeddingBatcher::new(
            MockEmbeddingService::new(2),
            IngestConfig::builder()
                .batch_size(2)
                .rpm(500, 50, 500)
                .checkpoint_path(&path)
                .build(),
        )
        .with_progress(tx);
        let cancel = batcher.cancel_token();
        let input = records(6);

        let watcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if matches!(event, IngestProgress::Batch { completed: 2, .. }) {
                    cancel.cancel();
                }
            }
        });
        let err = batcher.embed(&input).await.unwrap_err();
        drop(batcher);
        watcher.await.unwrap();

        match err {
            IngestError::Cancelled { completed, total } => {
                assert_eq!(total, 6);
                assert!(completed >= 2 && completed < 6);
                let saved = Checkpoint::new(&path).load().unwrap().unwrap();
                assert_eq!(saved.len(), completed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_size_respects_service_limit() {
        let service = MockEmbeddingService::new(2).with_max_batch(2);
        EmbeddingBatcher::new(service.clone(), IngestConfig::default())
            .embed(&records(5))
            .await
            .unwrap();

        let sizes: Vec<usize> = service.calls().iter().map(|c| c.texts.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events() {
        let (tx, mut rx) = mpsc::channel(32);
        let batcher = EmbeddingBatcher::new(
            MockEmbeddingService::new(2),
            IngestConfig::builder().batch_size(2).build(),
        )
        .with_progress(tx);
        let started = Instant::now();
        batcher.embed(&records(3)).await.unwrap();
        drop(batcher);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events.first(),
            Some(&IngestProgress::Started {
                total: 3,
                resumed_from: 0
            })
        );
        assert!(events.contains(&IngestProgress::Batch {
            completed: 3,
            total: 3,
            rpm: 200
        }));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_checkpoint_survives_a_crash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.npy");
        let service = MockEmbeddingService::new(3).script(3, Scripted::Stall);
        let config = IngestConfig::builder()
            .batch_size(2)
            .checkpoint_every(2)
            .request_timeout(Duration::from_secs(600))
            .checkpoint_path(&path)
            .build();
        let input = records(10);
        let (tx, mut rx) = mpsc::channel(32);
        let batcher = EmbeddingBatcher::new(service.clone(), config).with_progress(tx);

        let outcome = tokio::time::timeout(Duration::from_secs(60), batcher.embed(&input)).await;
        assert!(outcome.is_err());
        drop(batcher);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.contains(&IngestProgress::Checkpointed { rows: 4 }));
        assert!(events.contains(&IngestProgress::Batch {
            completed: 6,
            total: 10,
            rpm: 200
        }));
        assert_eq!(service.calls().len(), 4);

        let saved = Checkpoint::new(&path).load().unwrap().unwrap();
        assert_eq!(saved, expected(&input[..4], 3));
    }
}
