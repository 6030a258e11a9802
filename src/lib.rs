//! # staysearch
//!
//! Multi-space weighted hybrid search over rental listings.
//!
//! Every listing is encoded once into a composite vector: one segment per
//! space (text similarity, numeric preference, recency, category). A query
//! is a vector of the same shape whose segments carry the caller's weights,
//! so a single dot product ranks by the weighted sum of per-space
//! similarities, and hard filters prune the candidates first.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! DATA_PATH=listings.jsonl staysearch --port 8080
//! curl -X POST localhost:8080/api/v1/search/filter_query \
//!      -H 'content-type: application/json' \
//!      -d '{"query_description": "quiet loft", "price_smaller_than": 150}'
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use staysearch::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = listings::index_config("local", 64, chrono::Utc::now());
//! let index = Arc::new(CompositeIndex::new(
//!     config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HashEmbedder::new(64)),
//! )?);
//! index
//!     .index(Record::new("1").with_text("description", "sunny flat").with_number("price", 90.0))
//!     .await?;
//!
//! let executor = SearchExecutor::new(index, QueryCompiler::new())
//!     .with_templates(listings::templates())?;
//! let mut params = Params::new();
//! params.insert("query_description".into(), "sunny".into());
//! let response = executor.run("filter_query", &params).await?;
//! println!("{:?}", response.ids());
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - [`staysearch_core`]: schema, records, spaces, composite index, in-memory store
//! - [`staysearch_storage`]: snapshots and the Qdrant backend
//! - [`staysearch_query`]: templates, the compiler and natural-language translation
//! - [`staysearch_api`]: REST endpoints

pub mod app;
pub mod listings;
pub mod loader;
pub mod settings;

pub use staysearch_api as api;
pub use staysearch_core as core;
pub use staysearch_query as query;
pub use staysearch_storage as storage;

/// Common imports for library use
pub mod prelude {
    pub use crate::listings;
    pub use staysearch_core::{
        AttributeKind, AttributeValue, BatchReport, CompositeIndex, Comparator, Embedder, Error,
        Filter, FilterCondition, HashEmbedder, IndexConfig, MemoryStore, Query, Record, Result,
        Schema, Space, VectorStore,
    };
    pub use staysearch_query::{
        Params, QueryCompiler, QueryTemplate, SearchExecutor, SearchResponse, Translator,
    };
}
