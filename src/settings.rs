//! Process settings
//!
//! Every field can come from the command line or from the environment
//! variable named next to it. Settings are parsed once in `main` and passed
//! explicitly to whatever needs them.

use chrono::{DateTime, Utc};
use clap::{builder::BoolishValueParser, ArgAction, Parser, ValueEnum};
use serde::{Serialize, Serializer};
use staysearch_core::record::parse_timestamp_str;
use staysearch_core::{Error, Result};
use staysearch_query::openai::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TEXT_MODEL: &str = "Alibaba-NLP/gte-large-en-v1.5";

/// A credential that never shows up in logs or debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl FromStr for Secret {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Secret(s.to_string()))
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic offline hashing embedder
    Hash,
    /// OpenAI-compatible `/embeddings` endpoint
    Openai,
}

/// Multi-space hybrid search over rental listings
#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "staysearch")]
#[command(about = "Multi-space hybrid search over rental listings", long_about = None)]
pub struct Settings {
    /// Listings file to load at startup (JSON array or JSON Lines)
    #[arg(long, env = "DATA_PATH")]
    pub data_path: Option<PathBuf>,

    /// Store vectors in Qdrant instead of in memory
    #[arg(long = "use-qdrant", env = "USE_QDRANT_VECTOR_DB", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub use_qdrant: bool,

    #[arg(long, env = "QDRANT_CLUSTER_URL")]
    pub qdrant_url: Option<String>,

    #[arg(long, env = "QDRANT_API_KEY")]
    pub qdrant_api_key: Option<Secret>,

    #[arg(long, env = "QDRANT_COLLECTION_NAME", default_value = "airbnb_semantic_search")]
    pub qdrant_collection: String,

    /// Enables natural-language queries when set
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<Secret>,

    #[arg(long, env = "OPENAI_MODEL_ID", default_value = DEFAULT_CHAT_MODEL)]
    pub openai_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "STAYSEARCH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "STAYSEARCH_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProvider::Hash)]
    pub embedding_provider: EmbeddingProvider,

    /// Model identity of the text spaces
    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_TEXT_MODEL)]
    pub embedding_model: String,

    #[arg(long, env = "EMBEDDING_DIM", default_value_t = 384)]
    pub embedding_dim: usize,

    /// Save the in-memory store here on shutdown and restore it on startup
    #[arg(long, env = "SNAPSHOT_DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Reference "now" for recency scoring; defaults to process start
    #[arg(long, env = "REFERENCE_TIME", value_parser = parse_reference_time)]
    pub reference_time: Option<DateTime<Utc>>,

    /// Timeout for hosted model and Qdrant calls, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn parse_reference_time(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp_str(raw).ok_or_else(|| format!("'{}' is not a date or RFC 3339 timestamp", raw))
}

fn present(secret: &Option<Secret>) -> bool {
    secret.as_ref().is_some_and(|s| !s.is_empty())
}

impl Settings {
    /// Check cross-field requirements clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.use_qdrant {
            let mut missing = Vec::new();
            if self.qdrant_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                missing.push("QDRANT_CLUSTER_URL");
            }
            if !present(&self.qdrant_api_key) {
                missing.push("QDRANT_API_KEY");
            }
            if self.qdrant_collection.trim().is_empty() {
                missing.push("QDRANT_COLLECTION_NAME");
            }
            if !missing.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "Missing required Qdrant settings: {:?}",
                    missing
                )));
            }
        }
        if self.embedding_provider == EmbeddingProvider::Openai && !present(&self.openai_api_key) {
            return Err(Error::InvalidConfig(
                "OPENAI_API_KEY is required for the openai embedding provider".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(Error::InvalidConfig("EMBEDDING_DIM must be positive".to_string()));
        }
        Ok(())
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn translation_enabled(&self) -> bool {
        present(&self.openai_api_key)
    }
}
