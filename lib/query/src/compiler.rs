//! Query compiler
//!
//! Resolves a template plus a flat parameter map into a structured
//! [`Query`]. Natural-language input is translated first; explicit
//! parameters always win over translated ones.

use crate::params::{self, Params};
use crate::template::{ParamKind, QueryTemplate, LIMIT_PARAM};
use crate::translator::Translator;
use serde::Serialize;
use serde_json::Value;
use staysearch_core::{
    AttributeKind, AttributeValue, CompositeIndex, Error, FilterCondition, Query, Result, Space, BASELINE_WEIGHT,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TRANSLATION_TIMEOUT: Duration = Duration::from_secs(30);

/// A compiled query together with what the translator contributed
#[derive(Debug, Clone, Serialize)]
pub struct CompiledQuery {
    pub query: Query,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_query: Option<String>,
    /// Translated parameters that were applied
    pub translated: Params,
}

pub struct QueryCompiler {
    translator: Option<Arc<dyn Translator>>,
    timeout: Duration,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCompiler {
    pub fn new() -> Self {
        Self {
            translator: None,
            timeout: DEFAULT_TRANSLATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_translator(&self) -> bool {
        self.translator.is_some()
    }

    pub async fn compile(
        &self,
        template: &QueryTemplate,
        explicit: &Params,
        index: &CompositeIndex,
    ) -> Result<CompiledQuery> {
        for key in explicit.keys() {
            if !template.declares(key) {
                return Err(Error::InvalidParameter(format!(
                    "query '{}' has no parameter '{}'",
                    template.name, key
                )));
            }
        }

        let natural_query = match &template.natural_query {
            Some(param) => match explicit.get(param) {
                Some(v) if !params::is_absent(v) => Some(params::text(param, v)?),
                _ => None,
            },
            None => None,
        };

        let translated = match &natural_query {
            Some(text) => self.translate(template, text, explicit, index).await?,
            None => Params::new(),
        };

        let mut merged = translated.clone();
        for (key, value) in explicit {
            if !params::is_absent(value) {
                merged.insert(key.clone(), value.clone());
            }
        }

        let query = build_query(template, &merged, index)?;
        Ok(CompiledQuery {
            query,
            natural_query,
            translated,
        })
    }

    /// Ask the translator, then keep only declared, non-explicit values,
    /// coercing numeric phrases to numbers
    async fn translate(
        &self,
        template: &QueryTemplate,
        text: &str,
        explicit: &Params,
        index: &CompositeIndex,
    ) -> Result<Params> {
        let translator = self.translator.as_ref().ok_or_else(|| {
            Error::TranslationFailed("no natural-language translator is configured".to_string())
        })?;
        let specs = template.translatable_params(index);

        let raw = tokio::time::timeout(self.timeout, translator.translate(text, &specs))
            .await
            .map_err(|_| {
                Error::TranslationFailed(format!("translator timed out after {:?}", self.timeout))
            })??;

        let mut accepted = Params::new();
        for (key, value) in raw {
            let Some(spec) = specs.iter().find(|s| s.name == key) else {
                debug!("Ignoring translated value for undeclared param '{}'", key);
                continue;
            };
            if params::is_absent(&value)
                || explicit.get(&key).is_some_and(|v| !params::is_absent(v))
            {
                continue;
            }
            match spec.kind {
                ParamKind::Number => match params::loose_number(&value) {
                    Some(n) if n < 0.0 && template.is_weight_param(&key) => {
                        warn!("Dropping translated '{}': negative weight {}", key, n)
                    }
                    Some(n) => {
                        accepted.insert(key, Value::from(n));
                    }
                    None => warn!("Dropping translated '{}': no number in {}", key, value),
                },
                ParamKind::Text => {
                    let text = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    if !spec.options.is_empty() && !spec.options.iter().any(|o| o.eq_ignore_ascii_case(&text)) {
                        warn!("Dropping translated '{}': '{}' is not an allowed option", key, text);
                        continue;
                    }
                    accepted.insert(key, Value::String(text));
                }
            }
        }
        Ok(accepted)
    }
}

/// Build the structured query from resolved parameter values
pub fn build_query(template: &QueryTemplate, values: &Params, index: &CompositeIndex) -> Result<Query> {
    let present = |name: &str| values.get(name).filter(|v| !params::is_absent(v));

    let limit = match present(LIMIT_PARAM) {
        Some(v) => params::limit(v)?,
        None => template.limit,
    };
    let mut query = Query::new(limit);

    for binding in &template.weights {
        if let Some(v) = present(&binding.param) {
            query = query.with_weight(binding.space.clone(), params::weight(&binding.param, v)?);
        }
    }

    for clause in &template.clauses {
        let Some(v) = present(&clause.value_param) else {
            continue;
        };
        let space = index.space(&clause.space).ok_or_else(|| {
            Error::SchemaMismatch(format!("unknown space '{}'", clause.space))
        })?;
        let reference = match space {
            Space::Number(_) => AttributeValue::Number(params::strict_number(v).ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "'{}' must be a number, got {}",
                    clause.value_param, v
                ))
            })?),
            Space::Recency(_) => params::threshold(&clause.value_param, AttributeKind::Timestamp, v)
                .map_err(|_| {
                    Error::InvalidParameter(format!(
                        "'{}' must be a timestamp, got {}",
                        clause.value_param, v
                    ))
                })?,
            Space::Text(_) | Space::Category(_) => {
                AttributeValue::Text(params::text(&clause.value_param, v)?)
            }
        };
        let weight = match &clause.weight_param {
            Some(param) => match present(param) {
                Some(w) => params::weight(param, w)?,
                None => BASELINE_WEIGHT,
            },
            None => BASELINE_WEIGHT,
        };
        query = query.similar(clause.space.clone(), reference, weight);
    }

    for filter in &template.filters {
        let Some(v) = present(&filter.param) else {
            continue;
        };
        let kind = index.schema().kind_of(&filter.attribute).ok_or_else(|| {
            Error::InvalidFilter(format!("unknown attribute '{}'", filter.attribute))
        })?;
        let threshold = params::threshold(&filter.param, kind, v)?;
        if let AttributeValue::Text(label) = &threshold {
            if !filter.options.is_empty() && !filter.options.iter().any(|o| o.eq_ignore_ascii_case(label)) {
                return Err(Error::InvalidFilter(format!(
                    "'{}' must be one of [{}], got '{}'",
                    filter.param,
                    filter.options.join(", "),
                    label
                )));
            }
        }
        query = query.filter(FilterCondition::compare(
            filter.attribute.clone(),
            filter.comparator,
            threshold,
        )?);
    }

    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParamSpec;
    use async_trait::async_trait;
    use serde_json::json;
    use staysearch_core::{
        CategorySpace, Comparator, HashEmbedder, IndexConfig, MemoryStore,
        NumberMode, NumberSpace, Schema, TextSpace,
    };

    struct FixedTranslator(Params);

    #[async_trait]
    impl Translator for FixedTranslator {
        async fn translate(&self, _text: &str, _params: &[ParamSpec]) -> Result<Params> {
            Ok(self.0.clone())
        }
    }

    struct SlowTranslator;

    #[async_trait]
    impl Translator for SlowTranslator {
        async fn translate(&self, _text: &str, _params: &[ParamSpec]) -> Result<Params> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Params::new())
        }
    }

    fn index() -> CompositeIndex {
        let schema = Schema::new("listing")
            .with_field("description", AttributeKind::Text)
            .with_field("room_type", AttributeKind::Category)
            .with_field("price", AttributeKind::Number)
            .with_field("review_scores_rating", AttributeKind::Number);
        let spaces = vec![
            Space::Text(TextSpace::new("description", "description", "m", 16)),
            Space::Category(CategorySpace::new(
                "room_type",
                "room_type",
                vec!["Private room".to_string(), "Shared room".to_string()],
            )),
            Space::Number(NumberSpace::new("price", "price", 0.0, 1000.0, NumberMode::Minimum)),
            Space::Number(NumberSpace::new(
                "rating",
                "review_scores_rating",
                0.0,
                5.0,
                NumberMode::Maximum,
            )),
        ];
        CompositeIndex::new(
            IndexConfig::new("listings", schema, spaces, chrono::Utc::now()),
            Arc::new(MemoryStore::new()),
            Arc::new(HashEmbedder::new(16)),
        )
        .unwrap()
    }

    fn template() -> QueryTemplate {
        QueryTemplate::new("filter_query")
            .weight("price", "price_weight")
            .weight("rating", "rating_weight")
            .similar("description", "query_description", Some("description_clause_weight"))
            .filter("room_type", Comparator::Eq, "filter_by_type")
            .with_options(["Private room", "Shared room"])
            .filter("price", Comparator::Le, "price_smaller_than")
            .filter("review_scores_rating", Comparator::Ge, "review_rating_bigger_than")
            .natural_query("natural_query")
            .limit(5)
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[tokio::test]
    async fn test_explicit_params_build_query() {
        let compiled = QueryCompiler::new()
            .compile(
                &template(),
                &params(json!({
                    "price_weight": 2.0,
                    "price_smaller_than": "200",
                    "filter_by_type": "private room",
                    "query_description": "quiet loft",
                    "limit": 3
                })),
                &index(),
            )
            .await
            .unwrap();
        let q = compiled.query;
        assert_eq!(q.limit, 3);
        assert_eq!(q.weight_for("price"), 2.0);
        assert_eq!(q.weight_for("rating"), BASELINE_WEIGHT);
        assert_eq!(q.clauses.len(), 1);
        assert_eq!(q.clauses[0].weight, BASELINE_WEIGHT);
        assert_eq!(q.filters.len(), 2);
        assert!(q.filters.contains(&FilterCondition::LessEqual {
            field: "price".to_string(),
            value: 200.0
        }));
    }

    #[tokio::test]
    async fn test_defaults_without_params() {
        let compiled = QueryCompiler::new()
            .compile(&template(), &Params::new(), &index())
            .await
            .unwrap();
        assert_eq!(compiled.query.limit, 5);
        assert!(compiled.query.filters.is_empty());
        assert!(compiled.query.clauses.is_empty());
    }

    #[tokio::test]
    async fn test_partial_translation_defaults_the_rest() {
        let translator = FixedTranslator(params(json!({ "price_smaller_than": "under 100" })));
        let compiled = QueryCompiler::new()
            .with_translator(Arc::new(translator))
            .compile(
                &template(),
                &params(json!({ "natural_query": "somewhere cheap, under 100" })),
                &index(),
            )
            .await
            .unwrap();

        let q = compiled.query;
        assert_eq!(q.weight_for("rating"), BASELINE_WEIGHT);
        assert_eq!(
            q.filters,
            vec![FilterCondition::LessEqual {
                field: "price".to_string(),
                value: 100.0
            }]
        );
        assert_eq!(compiled.translated["price_smaller_than"], json!(100.0));
    }

    #[tokio::test]
    async fn test_explicit_wins_and_undeclared_ignored() {
        let translator = FixedTranslator(params(json!({
            "price_smaller_than": 80,
            "stars": 5,
            "filter_by_type": "Castle"
        })));
        let compiled = QueryCompiler::new()
            .with_translator(Arc::new(translator))
            .compile(
                &template(),
                &params(json!({ "natural_query": "x", "price_smaller_than": 300 })),
                &index(),
            )
            .await
            .unwrap();
        assert_eq!(
            compiled.query.filters,
            vec![FilterCondition::LessEqual {
                field: "price".to_string(),
                value: 300.0
            }]
        );
        assert!(compiled.translated.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_translated_number_dropped() {
        let translator = FixedTranslator(params(json!({ "review_rating_bigger_than": "very good" })));
        let compiled = QueryCompiler::new()
            .with_translator(Arc::new(translator))
            .compile(&template(), &params(json!({ "natural_query": "x" })), &index())
            .await
            .unwrap();
        assert!(compiled.query.filters.is_empty());
    }

    #[tokio::test]
    async fn test_negative_weights_rejected_or_dropped() {
        let err = QueryCompiler::new()
            .compile(&template(), &params(json!({ "rating_weight": -1.0 })), &index())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let translator = FixedTranslator(params(json!({
            "rating_weight": -2,
            "description_clause_weight": "-0.5",
            "price_weight": 0.5
        })));
        let compiled = QueryCompiler::new()
            .with_translator(Arc::new(translator))
            .compile(&template(), &params(json!({ "natural_query": "x" })), &index())
            .await
            .unwrap();
        assert_eq!(compiled.query.weight_for("rating"), BASELINE_WEIGHT);
        assert_eq!(compiled.query.weight_for("price"), 0.5);
        assert!(!compiled.translated.contains_key("rating_weight"));
        assert!(!compiled.translated.contains_key("description_clause_weight"));
    }

    #[tokio::test]
    async fn test_natural_query_without_translator_fails() {
        let err = QueryCompiler::new()
            .compile(&template(), &params(json!({ "natural_query": "x" })), &index())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TranslationFailed(_)));
    }

    #[tokio::test]
    async fn test_translator_timeout() {
        let err = QueryCompiler::new()
            .with_translator(Arc::new(SlowTranslator))
            .with_timeout(Duration::from_millis(20))
            .compile(&template(), &params(json!({ "natural_query": "x" })), &index())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TranslationFailed(_)));
    }

    #[tokio::test]
    async fn test_explicit_type_errors() {
        let compiler = QueryCompiler::new();
        let (t, idx) = (template(), index());

        let err = compiler
            .compile(&t, &params(json!({ "price_weight": "heavy" })), &idx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let err = compiler
            .compile(&t, &params(json!({ "price_smaller_than": "cheap" })), &idx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));

        let err = compiler
            .compile(&t, &params(json!({ "filter_by_type": "Castle" })), &idx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));

        let err = compiler
            .compile(&t, &params(json!({ "limit": 0 })), &idx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let err = compiler
            .compile(&t, &params(json!({ "nonsense": 1 })), &idx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
