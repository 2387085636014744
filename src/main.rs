//! # paperscout CLI Application
//!
//! Command-line front end for corpus ingestion, index building, search, and
//! user profile management.
//!
//! ## Subcommands
//!
//! - `embed`: embed the corpus with adaptive pacing and resumable checkpoints
//! - `build-index`: build the flat vector index from stored embeddings
//! - `search`: diversified, optionally personalized and explained search
//! - `user`: create users, like and unlike papers, inspect likes and history
//!
//! Settings come from the environment (see `paperscout::config`); flags
//! override them per invocation.

mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use paperscout::config::{Settings, SettingsBuilder};
use paperscout::index::{Corpus, FlatIndex, Metric, VectorIndex};
use paperscout::ingest::{
    CancelToken, Checkpoint, EmbeddingBatcher, EmbeddingMatrix, EmbeddingRun, IngestConfig,
    IngestProgress, TextRecord,
};
use paperscout::model::{self, EmbeddingService, OpenAiEmbedder};
use paperscout::profile::{IndexedProfiles, ProfileStore};
use paperscout::rank::{Explainer, RetrievalEngine, SearchConfig, SearchResponse};
use rig::completion::CompletionModel;
use rig::providers::gemini;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

#[derive(Parser)]
#[command(author, version, about = "Rate-limited embedding and diversified search over research papers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model provider for embeddings and explanations
    #[arg(long, global = true, value_enum, default_value = "openai", env = "PAPERSCOUT_PROVIDER")]
    provider: Provider,

    /// Directory holding the corpus (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding checkpoints, the index, and the profile database (overrides CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, env = "PAPERSCOUT_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Export traces and metrics over OTLP
    #[arg(long, global = true)]
    otlp: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Provider {
    Openai,
    Gemini,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MetricArg {
    L2,
    Cosine,
}

impl From<MetricArg> for Metric {
    fn from(metric: MetricArg) -> Self {
        match metric {
            MetricArg::L2 => Metric::L2,
            MetricArg::Cosine => Metric::Cosine,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Embed the corpus, resuming from the checkpoint when present
    Embed(EmbedArgs),

    /// Build the vector index from stored embeddings
    BuildIndex(BuildIndexArgs),

    /// Search the corpus
    Search(SearchArgs),

    /// Manage user profiles
    #[command(subcommand)]
    User(UserCommands),
}

#[derive(Args, Debug)]
struct EmbedArgs {
    /// Records per request
    #[arg(short, long, default_value = "350", env = "EMBED_BATCH_SIZE")]
    batch_size: usize,

    /// Starting requests per minute
    #[arg(long, default_value = "200", env = "EMBED_INITIAL_RPM")]
    initial_rpm: u32,

    /// Lowest requests per minute after throttling
    #[arg(long, default_value = "50", env = "EMBED_MIN_RPM")]
    min_rpm: u32,

    /// Highest requests per minute after recovery
    #[arg(long, default_value = "500", env = "EMBED_MAX_RPM")]
    max_rpm: u32,

    /// Retries per batch before giving up
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Save the checkpoint every N batches
    #[arg(long, default_value = "10")]
    checkpoint_every: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Discard any existing checkpoint and start over
    #[arg(long)]
    restart: bool,
}

#[derive(Args, Debug)]
struct BuildIndexArgs {
    /// Distance metric
    #[arg(short, long, value_enum, default_value = "l2")]
    metric: MetricArg,

    /// Rebuild even when a matching index exists
    #[arg(short, long)]
    force: bool,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Search query
    #[arg(required = true)]
    query: String,

    /// Number of results
    #[arg(short = 'k', long, default_value = "5")]
    top_k: usize,

    /// Candidates fetched before re-ranking
    #[arg(long, default_value = "25")]
    fetch_k: usize,

    /// MMR relevance weight in [0, 1]
    #[arg(long, default_value = "0.7")]
    lambda: f32,

    /// Distance metric; defaults to the one the stored index was built with
    #[arg(short, long, value_enum)]
    metric: Option<MetricArg>,

    /// Keep plain nearest-neighbor order
    #[arg(long)]
    no_mmr: bool,

    /// Ignore the user's liked papers
    #[arg(long)]
    no_personalize: bool,

    /// Personalize for and record history under this user
    #[arg(short, long)]
    user: Option<String>,

    /// Ask the chat model to explain the results
    #[arg(long)]
    explain: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum UserCommands {
    /// Create a user
    Create { username: String },

    /// Like a paper by its paper URL
    Like { username: String, paper_url: String },

    /// Remove a like
    Unlike { username: String, paper_url: String },

    /// List liked papers
    Likes {
        username: String,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show recent searches
    History {
        username: String,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = SettingsBuilder::from_settings(Settings::from_env()?);
    if let Some(dir) = cli.data_dir.clone() {
        settings = settings.data_dir(dir);
    }
    if let Some(dir) = cli.cache_dir.clone() {
        settings = settings.cache_dir(dir);
    }
    let settings = settings.build();

    let _telemetry = telemetry::init_tracing_subscriber(
        &settings.log_level,
        cli.log_file.as_deref(),
        cli.otlp,
    )?;
    info!(env = %settings.app_env, provider = ?cli.provider, "Starting paperscout");

    match cli.command {
        Commands::Embed(args) => embed_command(&settings, cli.provider, args).await?,
        Commands::BuildIndex(args) => build_index_command(&settings, cli.provider, args)?,
        Commands::Search(args) => search_command(&settings, cli.provider, args).await?,
        Commands::User(command) => user_command(&settings, command).await?,
    }

    Ok(())
}

/// Embeddings file for the selected provider
fn embeddings_path(settings: &Settings, provider: Provider) -> PathBuf {
    match provider {
        Provider::Openai => settings.checkpoint_path(),
        Provider::Gemini => settings.cache_dir.join(format!(
            "gemini_{}.npy",
            gemini::embedding::EMBEDDING_004.replace('-', "_")
        )),
    }
}

fn load_corpus(settings: &Settings) -> anyhow::Result<Corpus> {
    let path = settings.corpus_path();
    Corpus::load_jsonl(&path).with_context(|| format!("Failed to load corpus {}", path.display()))
}

fn load_embeddings(
    settings: &Settings,
    provider: Provider,
    corpus: &Corpus,
) -> anyhow::Result<EmbeddingMatrix> {
    let checkpoint = Checkpoint::new(embeddings_path(settings, provider));
    let embeddings = checkpoint.load()?.ok_or_else(|| {
        anyhow!(
            "No embeddings at {}; run `paperscout embed` first",
            checkpoint.path().display()
        )
    })?;
    if embeddings.len() != corpus.len() {
        bail!(
            "Embeddings cover {} of {} documents; run `paperscout embed` to finish",
            embeddings.len(),
            corpus.len()
        );
    }
    Ok(embeddings)
}

#[instrument(skip(settings))]
async fn embed_command(settings: &Settings, provider: Provider, args: EmbedArgs) -> anyhow::Result<()> {
    let corpus = load_corpus(settings)?;
    let records = corpus.text_records();
    let checkpoint_path = embeddings_path(settings, provider);

    if args.restart {
        Checkpoint::new(checkpoint_path.clone()).remove()?;
    }

    let config = IngestConfig::builder()
        .batch_size(args.batch_size)
        .rpm(args.initial_rpm, args.min_rpm, args.max_rpm)
        .max_retries(args.max_retries)
        .checkpoint_every(args.checkpoint_every)
        .request_timeout(Duration::from_secs(args.timeout_secs))
        .checkpoint_path(checkpoint_path.clone())
        .seed(settings.seed)
        .build();

    println!(
        "Embedding {} documents into {}",
        records.len(),
        checkpoint_path.display()
    );
    let start_time = std::time::Instant::now();

    let run = match provider {
        Provider::Openai => {
            let embedder = OpenAiEmbedder::new(
                settings.require_openai_key()?,
                &settings.openai_base_url,
                &settings.embed_model,
                config.request_timeout,
            )?;
            run_batcher(embedder, config, &records).await?
        }
        Provider::Gemini => {
            let client = gemini::Client::new(settings.require_gemini_key()?);
            run_batcher(model::gemini_embedder(&client), config, &records).await?
        }
    };

    println!(
        "Embedded {} documents ({} resumed) in {:.2?}",
        run.vectors.len(),
        run.resumed_from,
        start_time.elapsed()
    );
    println!(
        "Sent {} batches with {} retries; final rate {} rpm",
        run.batches, run.retries, run.final_rate.current_rpm
    );
    Ok(())
}

/// Drive a batcher with a progress bar and Ctrl-C cancellation
async fn run_batcher<S: EmbeddingService>(
    service: S,
    config: IngestConfig,
    records: &[TextRecord],
) -> anyhow::Result<EmbeddingRun> {
    let (progress_sender, mut progress_receiver) = mpsc::channel(100);

    let progress_bar = ProgressBar::new(records.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")?
            .progress_chars("##-"),
    );
    progress_bar.set_message("Embedding...");

    let progress_handle = tokio::spawn({
        let progress_bar = progress_bar.clone();
        async move {
            while let Some(event) = progress_receiver.recv().await {
                match event {
                    IngestProgress::Started { resumed_from, .. } => {
                        progress_bar.set_position(resumed_from as u64);
                    }
                    IngestProgress::Batch { completed, rpm, .. } => {
                        progress_bar.set_position(completed as u64);
                        progress_bar.set_message(format!("{} rpm", rpm));
                    }
                    IngestProgress::Retrying {
                        batch,
                        attempt,
                        delay,
                    } => {
                        progress_bar.set_message(format!(
                            "batch {} retry {} in {:.1?}",
                            batch, attempt, delay
                        ));
                    }
                    IngestProgress::Checkpointed { rows } => {
                        progress_bar.set_message(format!("checkpointed {} rows", rows));
                    }
                }
            }
            progress_bar.finish_with_message("Embedding finished");
        }
    });

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current batch");
                cancel.cancel();
            }
        }
    });

    let batcher = EmbeddingBatcher::new(service, config)
        .with_progress(progress_sender)
        .with_cancel(cancel);
    let result = batcher.embed(records).await;

    // The progress task ends once the batcher's sender is gone
    drop(batcher);
    let _ = progress_handle.await;

    Ok(result?)
}

#[instrument(skip(settings))]
fn build_index_command(settings: &Settings, provider: Provider, args: BuildIndexArgs) -> anyhow::Result<()> {
    let corpus = load_corpus(settings)?;
    let embeddings = load_embeddings(settings, provider, &corpus)?;
    let path = settings.index_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let index = if args.force {
        let index = FlatIndex::build(&embeddings, args.metric.into());
        index.save(&path)?;
        index
    } else {
        FlatIndex::load_or_build(&path, &embeddings, args.metric.into())?
    };

    println!(
        "Index at {} holds {} vectors of dimension {} ({:?})",
        path.display(),
        index.len(),
        index.dims(),
        index.metric()
    );
    Ok(())
}

#[instrument(skip(settings, args), fields(query = %args.query))]
async fn search_command(settings: &Settings, provider: Provider, args: SearchArgs) -> anyhow::Result<()> {
    match provider {
        Provider::Openai => {
            let client = model::openai_client(settings, Duration::from_secs(60))?;
            let (completion, embedder) = client.into_parts();
            run_search(settings, provider, embedder, completion, args).await
        }
        Provider::Gemini => {
            let client = model::gemini_client(settings)?;
            let (completion, embedder) = client.into_parts();
            run_search(settings, provider, embedder, completion, args).await
        }
    }
}

async fn run_search<E, M>(
    settings: &Settings,
    provider: Provider,
    embedder: E,
    completion: M,
    args: SearchArgs,
) -> anyhow::Result<()>
where
    E: EmbeddingService,
    M: CompletionModel,
{
    let corpus = Arc::new(load_corpus(settings)?);
    let embeddings = load_embeddings(settings, provider, &corpus)?;
    let index = Arc::new(FlatIndex::load_for(
        &settings.index_path(),
        &embeddings,
        args.metric.map(Metric::from),
    )?);
    drop(embeddings);

    let store = open_store(settings).await?;
    let config = SearchConfig::builder()
        .top_k(args.top_k)
        .fetch_k(args.fetch_k)
        .lambda(args.lambda)
        .use_mmr(!args.no_mmr)
        .use_personalization(!args.no_personalize)
        .explain(args.explain)
        .build();

    let engine = RetrievalEngine::new(embedder, index.clone(), corpus.clone(), config)?
        .with_profiles(IndexedProfiles::new(store, corpus, index))
        .with_explainer(Explainer::new(completion));

    let mut request = engine.request(args.query.as_str());
    if let Some(user) = &args.user {
        request = request.user(user.as_str());
    }
    let response = engine.search(&request).await?;

    match args.format {
        OutputFormat::Json => {
            let json_response = serde_json::json!({
                "query": args.query,
                "user": args.user,
                "results": response.results,
                "explanation": response.explanation,
            });
            println!("{}", serde_json::to_string_pretty(&json_response)?);
        }
        OutputFormat::Text => print_response(&args.query, &response),
    }
    Ok(())
}

fn print_response(query: &str, response: &SearchResponse) {
    println!("Found {} results for: {}", response.results.len(), query);
    for result in &response.results {
        let document = &result.document;
        match &document.date {
            Some(date) => println!("{}. {} ({})", result.rank, document.title, date),
            None => println!("{}. {}", result.rank, document.title),
        }
        println!("   URL: {}", document.paper_url);
        if let Some(pdf) = &document.url_pdf {
            println!("   PDF: {}", pdf);
        }
        println!("   Distance: {:.4}", result.distance);
        println!();
    }
    if let Some(explanation) = &response.explanation {
        println!("{}", explanation);
    }
}

async fn open_store(settings: &Settings) -> anyhow::Result<ProfileStore> {
    let path = settings.profile_db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(ProfileStore::new_from_path(&path.to_string_lossy()).await?)
}

#[instrument(skip(settings))]
async fn user_command(settings: &Settings, command: UserCommands) -> anyhow::Result<()> {
    let store = open_store(settings).await?;

    match command {
        UserCommands::Create { username } => {
            if store.create_user(&username).await? {
                println!("Created user {}", username);
            } else {
                bail!("User {:?} already exists or is not a valid name", username);
            }
        }
        UserCommands::Like {
            username,
            paper_url,
        } => {
            let corpus = load_corpus(settings)?;
            let document = corpus
                .position_of_paper_url(&paper_url)
                .and_then(|row| corpus.get(row))
                .ok_or_else(|| anyhow!("No paper with URL {} in the corpus", paper_url))?;
            if store.like_paper(&username, document).await? {
                println!("Liked: {}", document.title);
            } else {
                println!("Not liked: unknown user or already liked");
            }
        }
        UserCommands::Unlike {
            username,
            paper_url,
        } => {
            if store.unlike_paper(&username, &paper_url).await? {
                println!("Removed {} from {}'s likes", paper_url, username);
            } else {
                bail!("Unknown user {:?}", username);
            }
        }
        UserCommands::Likes { username, format } => {
            let liked = store.liked_papers(&username).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&liked)?),
                OutputFormat::Text => {
                    println!("{} liked papers", liked.len());
                    for (i, paper) in liked.iter().enumerate() {
                        println!("{}. {}", i + 1, paper.title);
                        println!("   URL: {}", paper.paper_url);
                        println!("   Liked: {}", paper.liked_at.format("%Y-%m-%d %H:%M"));
                    }
                }
            }
        }
        UserCommands::History { username, format } => {
            let history = store.search_history(&username).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
                OutputFormat::Text => {
                    for entry in history.iter().rev() {
                        println!(
                            "{}  {:?} ({} results{})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.query,
                            entry.results_count,
                            entry
                                .top_result
                                .as_deref()
                                .map(|title| format!(", top: {}", title))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
