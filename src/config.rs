//! # Application Settings
//!
//! Process-wide settings read once at startup and handed to every consumer.
//! Values come from environment variables, with defaults for everything except
//! provider credentials.
//!
//! ## Key Components
//!
//! - `Settings`: provider credentials, model names, and storage locations
//! - `SettingsBuilder`: builder for tests and for CLI overrides
//!
//! Derived paths (corpus file, embedding checkpoint, index file, profile
//! database) are computed from `data_dir` and `cache_dir` so that every
//! subcommand agrees on where artifacts live.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default OpenAI-compatible API root
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// Default chat model used for result explanations
pub const DEFAULT_CHAT_MODEL: &str = "gpt-5";

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// API key for the OpenAI-compatible provider
    pub openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible provider
    pub openai_base_url: String,

    /// Embedding model name
    pub embed_model: String,

    /// Chat model name
    pub chat_model: String,

    /// API key for Gemini
    pub gemini_api_key: Option<String>,

    /// Directory holding the cleaned corpus
    pub data_dir: PathBuf,

    /// Directory holding checkpoints, the index, and the profile database
    pub cache_dir: PathBuf,

    /// Deployment environment name
    pub app_env: String,

    /// Default log filter
    pub log_level: String,

    /// Seed for backoff jitter
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            gemini_api_key: None,
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from(".cache"),
            app_env: "dev".to_string(),
            log_level: "info".to_string(),
            seed: 42,
        }
    }
}

impl Settings {
    /// Create a new builder
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let seed = match non_empty("SEED") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("SEED must be an integer: {}", e)))?,
            None => defaults.seed,
        };

        Ok(Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            embed_model: non_empty("OPENAI_EMBED_MODEL").unwrap_or(defaults.embed_model),
            chat_model: non_empty("OPENAI_CHAT_MODEL").unwrap_or(defaults.chat_model),
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            data_dir: non_empty("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_dir: non_empty("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            app_env: non_empty("APP_ENV").unwrap_or(defaults.app_env),
            log_level: non_empty("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
            seed,
        })
    }

    /// The OpenAI API key, rejecting placeholders
    pub fn require_openai_key(&self) -> Result<&str> {
        match self.openai_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() && key.trim() != "..." => Ok(key),
            _ => Err(Error::Config(
                "OPENAI_API_KEY is not set to a real key".to_string(),
            )),
        }
    }

    /// The Gemini API key
    pub fn require_gemini_key(&self) -> Result<&str> {
        self.gemini_api_key
            .as_deref()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))
    }

    /// Cleaned corpus in JSON Lines form
    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join("paperswithcode.jsonl")
    }

    /// Embedding checkpoint for the configured model
    pub fn checkpoint_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("openai_{}.npy", self.embed_model.replace('-', "_")))
    }

    /// Serialized vector index
    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join("flat_l2.index")
    }

    /// User profile database
    pub fn profile_db_path(&self) -> PathBuf {
        self.cache_dir.join("users.db")
    }
}

/// Builder for Settings
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
        }
    }

    /// Start from existing settings
    pub fn from_settings(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.settings.openai_api_key = Some(key.into());
        self
    }

    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.settings.openai_base_url = url.into();
        self
    }

    pub fn embed_model(mut self, model: impl Into<String>) -> Self {
        self.settings.embed_model = model.into();
        self
    }

    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.settings.chat_model = model.into();
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.data_dir = dir.into();
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.cache_dir = dir.into();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.settings.seed = seed;
        self
    }

    /// Build the settings
    pub fn build(self) -> Settings {
        self.settings
    }
}
