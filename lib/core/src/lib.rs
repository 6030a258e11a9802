//! # StaySearch Core
//!
//! Core library for multi-space structured similarity search.
//!
//! A record is encoded through several typed spaces and the sub-vectors are
//! concatenated into one composite vector. Queries carry a weight per space,
//! so a single dot product against the weighted query vector ranks records
//! by text relevance, numeric preference, category match and freshness at
//! once.
//!
//! - [`Space`] - Typed encoders (text, number, category, recency)
//! - [`CompositeIndex`] - Encodes records and searches them
//! - [`Query`] - Weights, similarity clauses, filters and a limit
//! - [`VectorStore`] - Backend seam, with [`MemoryStore`] built in
//!
//! ## Example
//!
//! ```rust
//! use staysearch_core::{
//!     AttributeKind, CompositeIndex, HashEmbedder, IndexConfig, MemoryStore, NumberMode,
//!     NumberSpace, Query, Record, Schema, Space,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let schema = Schema::new("listing").with_field("price", AttributeKind::Number);
//! let spaces = vec![Space::Number(NumberSpace::new(
//!     "price", "price", 0.0, 1000.0, NumberMode::Minimum,
//! ))];
//! let index = CompositeIndex::new(
//!     IndexConfig::new("listings", schema, spaces, chrono::Utc::now()),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HashEmbedder::new(16)),
//! )
//! .unwrap();
//!
//! index.index(Record::new("cheap").with_number("price", 40.0)).await.unwrap();
//! index.index(Record::new("dear").with_number("price", 400.0)).await.unwrap();
//!
//! let hits = index.search(&Query::new(1)).await.unwrap();
//! assert_eq!(hits[0].record.id, "cheap");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod embed;
pub mod error;
pub mod filter;
pub mod index;
pub mod query;
pub mod record;
pub mod schema;
pub mod space;
pub mod store;
pub mod vector;

pub use embed::{CachedEmbedder, Embedder, HashEmbedder, UnavailableEmbedder};
pub use error::{Error, Result};
pub use filter::{Comparator, Filter, FilterCondition};
pub use index::{BatchPolicy, BatchReport, CompositeIndex, IndexConfig, SkippedRecord};
pub use query::{Query, SimilarityClause, BASELINE_WEIGHT, DEFAULT_LIMIT};
pub use record::{AttributeValue, Record, MISSING_SENTINEL};
pub use schema::{AttributeKind, FieldDef, Schema};
pub use space::{
    CategorySpace, EncodeContext, NumberMode, NumberScale, NumberSpace, RecencySpace, Space,
    SpaceKind, TextSpace, UnknownCategoryPolicy,
};
pub use store::{
    top_k, IndexedRecord, MemoryStore, ScoredRecord, SearchPlan, Segment, SpaceLayout, VectorStore,
};
pub use vector::Vector;
