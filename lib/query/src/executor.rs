//! Search executor
//!
//! The request/response boundary: look up a named template, compile the
//! parameters, run the query against the index. No state is kept between
//! calls.

use crate::compiler::QueryCompiler;
use crate::explain::{SearchHit, SearchResponse, SearchStats};
use crate::params::Params;
use crate::template::QueryTemplate;
use ahash::AHashMap;
use parking_lot::RwLock;
use staysearch_core::{CompositeIndex, Error, Query, Result, ScoredRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct SearchExecutor {
    index: Arc<CompositeIndex>,
    compiler: QueryCompiler,
    templates: RwLock<AHashMap<String, Arc<QueryTemplate>>>,
}

impl SearchExecutor {
    pub fn new(index: Arc<CompositeIndex>, compiler: QueryCompiler) -> Self {
        Self {
            index,
            compiler,
            templates: RwLock::new(AHashMap::new()),
        }
    }

    /// Validate a template against the index and make it callable by name
    pub fn register(&self, template: QueryTemplate) -> Result<()> {
        template.validate(&self.index)?;
        info!("Registered query '{}'", template.name);
        self.templates
            .write()
            .insert(template.name.clone(), Arc::new(template));
        Ok(())
    }

    pub fn with_templates<I>(self, templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = QueryTemplate>,
    {
        for template in templates {
            self.register(template)?;
        }
        Ok(self)
    }

    pub fn index(&self) -> &Arc<CompositeIndex> {
        &self.index
    }

    pub fn template(&self, name: &str) -> Option<Arc<QueryTemplate>> {
        self.templates.read().get(name).cloned()
    }

    pub fn query_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a named query with a flat parameter map
    pub async fn run(&self, name: &str, params: &Params) -> Result<SearchResponse> {
        let started = Instant::now();
        let template = self
            .template(name)
            .ok_or_else(|| Error::QueryNotFound(name.to_string()))?;

        let compiled = self.compiler.compile(&template, params, &self.index).await?;
        let limit = compiled.query.limit;
        let results = self.run_query(&compiled.query).await?;

        let took_ms = started.elapsed().as_millis() as u64;
        debug!("Query '{}' returned {} results in {}ms", name, results.len(), took_ms);
        Ok(SearchResponse {
            stats: SearchStats {
                query: name.to_string(),
                limit,
                returned: results.len(),
                took_ms,
                natural_query: compiled.natural_query,
                translated: compiled.translated,
            },
            results: results.into_iter().map(SearchHit::from).collect(),
        })
    }

    /// Run an already structured query
    pub async fn run_query(&self, query: &Query) -> Result<Vec<ScoredRecord>> {
        self.index.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use staysearch_core::{
        AttributeKind, Comparator, HashEmbedder, IndexConfig, MemoryStore, NumberMode,
        NumberSpace, Record, Schema, Space,
    };

    async fn executor() -> SearchExecutor {
        let schema = Schema::new("listing")
            .with_field("price", AttributeKind::Number)
            .with_field("review_scores_rating", AttributeKind::Number);
        let spaces = vec![
            Space::Number(NumberSpace::new("price", "price", 0.0, 1000.0, NumberMode::Minimum)),
            Space::Number(NumberSpace::new(
                "rating",
                "review_scores_rating",
                0.0,
                5.0,
                NumberMode::Maximum,
            )),
        ];
        let index = Arc::new(
            CompositeIndex::new(
                IndexConfig::new("listings", schema, spaces, chrono::Utc::now()),
                Arc::new(MemoryStore::new()),
                Arc::new(HashEmbedder::new(8)),
            )
            .unwrap(),
        );
        for (id, price, rating) in [("1", 50.0, 4.9), ("2", 150.0, 3.0), ("3", 500.0, 4.5)] {
            index
                .index(
                    Record::new(id)
                        .with_number("price", price)
                        .with_number("review_scores_rating", rating),
                )
                .await
                .unwrap();
        }

        let template = QueryTemplate::new("base_query")
            .weight("price", "price_minimizer_weight")
            .weight("rating", "review_rating_maximizer_weight")
            .filter("price", Comparator::Le, "price_smaller_than")
            .limit(5);
        SearchExecutor::new(index, QueryCompiler::new())
            .with_templates([template])
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_named_query() {
        let executor = executor().await;
        let params = json!({
            "price_minimizer_weight": 1.0,
            "review_rating_maximizer_weight": 0.0,
            "price_smaller_than": 200
        });
        let response = executor
            .run("base_query", params.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(response.ids(), vec!["1", "2"]);
        assert_eq!(response.stats.returned, 2);
        assert!(response.results[0].score >= response.results[1].score);
        assert!(response.results[0].explain.contains_key("price"));
    }

    #[tokio::test]
    async fn test_unknown_query() {
        let executor = executor().await;
        assert!(matches!(
            executor.run("nope", &Params::new()).await,
            Err(Error::QueryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_filter_without_match_is_empty() {
        let executor = executor().await;
        let params = json!({ "price_smaller_than": 10 });
        let response = executor
            .run("base_query", params.as_object().unwrap())
            .await
            .unwrap();
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_space() {
        let executor = executor().await;
        let bad = QueryTemplate::new("bad").weight("vibes", "vibes_weight");
        assert!(matches!(executor.register(bad), Err(Error::SchemaMismatch(_))));
        assert_eq!(executor.query_names(), vec!["base_query".to_string()]);
    }
}
