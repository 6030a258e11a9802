//! # StaySearch Query
//!
//! Named query templates, the query compiler with natural-language
//! translation, hosted-model clients and the search executor.

pub mod compiler;
pub mod executor;
pub mod explain;
pub mod openai;
pub mod params;
pub mod template;
pub mod translator;

pub use compiler::{build_query, CompiledQuery, QueryCompiler, DEFAULT_TRANSLATION_TIMEOUT};
pub use executor::SearchExecutor;
pub use explain::{SearchHit, SearchResponse, SearchStats};
pub use openai::{OpenAiConfig, OpenAiEmbedder, OpenAiTranslator};
pub use params::Params;
pub use template::{ParamKind, ParamSpec, QueryTemplate, LIMIT_PARAM};
pub use translator::Translator;
