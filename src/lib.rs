//! # paperscout - Paper Search over Embedded Corpora
//!
//! This crate embeds a research-paper corpus through a rate-limited external
//! embedding service and answers free-text queries with diversified,
//! optionally personalized, rankings.
//!
//! ## Features
//!
//! - Resumable corpus ingestion with adaptive request pacing:
//!   - Throttle-aware rate control with seeded backoff jitter
//!   - Atomic checkpoints in `.npy` form
//!   - Progress events and cooperative cancellation
//! - Exact flat vector index with a versioned on-disk format
//! - Maximal Marginal Relevance re-ranking
//! - Personalization from liked papers kept in LibSQL
//! - Optional result explanations through a `rig` agent
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use paperscout::config::Settings;
//! use paperscout::index::{Corpus, FlatIndex, Metric};
//! use paperscout::ingest::{EmbeddingBatcher, IngestConfig};
//! use paperscout::model::OpenAiEmbedder;
//! use paperscout::rank::{RetrievalEngine, SearchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env()?;
//!     let corpus = Corpus::load_jsonl(&settings.corpus_path())?;
//!
//!     let ingest = IngestConfig::builder()
//!         .checkpoint_path(settings.checkpoint_path())
//!         .build();
//!     let embedder = OpenAiEmbedder::new(
//!         settings.require_openai_key()?,
//!         &settings.openai_base_url,
//!         &settings.embed_model,
//!         ingest.request_timeout,
//!     )?;
//!     let run = EmbeddingBatcher::new(embedder.clone(), ingest)
//!         .embed(&corpus.text_records())
//!         .await?;
//!
//!     let index = FlatIndex::build(&run.vectors, Metric::L2);
//!     let engine = RetrievalEngine::new(
//!         embedder,
//!         Arc::new(index),
//!         Arc::new(corpus),
//!         SearchConfig::default(),
//!     )?;
//!     let response = engine.search(&engine.request("graph neural networks")).await?;
//!     for result in response.results {
//!         println!("{}. {}", result.rank, result.document.title);
//!     }
//!     Ok(())
//! }
//! ```

mod error;

pub mod config;
pub mod index;
pub mod ingest;
pub mod model;
pub mod profile;
pub mod rank;

pub use error::{Error, Result};
