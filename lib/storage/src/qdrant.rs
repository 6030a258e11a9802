//! Qdrant-backed vector store
//!
//! Composite vectors live in a single unnamed vector per point with `Dot`
//! distance, so Qdrant's score is the same weighted sum the in-memory store
//! computes. The record travels as payload next to a flattened attribute
//! map used for server-side filtering.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use staysearch_core::filter::ordering_key;
use staysearch_core::{
    top_k, AttributeValue, Error, Filter, FilterCondition, IndexedRecord, Record, Result,
    ScoredRecord, SearchPlan, Vector, VectorStore,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Page multiplier when some filters can only be checked locally, and the
/// margin added to every page so ties at the limit stay visible
const OVERFETCH: usize = 4;

/// Largest page requested while widening a search to settle ties
const MAX_PAGE: usize = 10_000;

#[derive(Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub timeout: Duration,
}

impl fmt::Debug for QdrantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("collection", &self.collection)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: None,
            collection: collection.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

pub struct QdrantStore {
    client: Client,
    config: QdrantConfig,
    dimension: usize,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct ScoredPoint {
    payload: Option<Value>,
    vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

impl QdrantStore {
    /// Connect and make sure the collection exists with the right shape
    pub async fn connect(config: QdrantConfig, dimension: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(storage_error)?;
        let store = Self {
            client,
            config,
            dimension,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.config.url, self.config.collection, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.config.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn ensure_collection(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(storage_error)?;

        if response.status().is_success() {
            let body: Value = response.json().await.map_err(storage_error)?;
            let size = body
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .map(|s| s as usize);
            if let Some(size) = size {
                if size != self.dimension {
                    return Err(Error::InvalidDimension {
                        expected: self.dimension,
                        actual: size,
                    });
                }
            }
            debug!("Using existing Qdrant collection {}", self.config.collection);
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(status_error(response).await);
        }

        let body = json!({ "vectors": { "size": self.dimension, "distance": "Dot" } });
        let response = self
            .request(reqwest::Method::PUT, "")
            .json(&body)
            .send()
            .await
            .map_err(storage_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        info!(
            "Created Qdrant collection {} ({} dimensions)",
            self.config.collection, self.dimension
        );
        Ok(())
    }

    async fn search_page(&self, plan: &SearchPlan, must: &[Value], limit: usize) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": plan.query.as_slice(),
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if !must.is_empty() {
            body["filter"] = json!({ "must": must });
        }

        let response = self
            .request(reqwest::Method::POST, "/points/search")
            .json(&body)
            .send()
            .await
            .map_err(storage_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let points: Envelope<Vec<ScoredPoint>> = response.json().await.map_err(storage_error)?;
        Ok(points.result)
    }

    fn to_entry(&self, point: ScoredPoint) -> Result<IndexedRecord> {
        let payload = point
            .payload
            .ok_or_else(|| Error::Storage("point returned without payload".to_string()))?;
        let record: Record = serde_json::from_value(
            payload
                .get("record")
                .cloned()
                .ok_or_else(|| Error::Storage("payload has no record".to_string()))?,
        )?;
        let version = payload.get("version").and_then(Value::as_u64).unwrap_or(0);
        let vector = point
            .vector
            .map(Vector::new)
            .unwrap_or_else(|| Vector::zeros(self.dimension));
        Ok(IndexedRecord {
            record,
            vector,
            version,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn upsert(&self, entry: IndexedRecord) -> Result<()> {
        if entry.vector.dim() != self.dimension {
            return Err(Error::InvalidDimension {
                expected: self.dimension,
                actual: entry.vector.dim(),
            });
        }
        let body = json!({
            "points": [{
                "id": point_id(&entry.record.id),
                "vector": entry.vector.as_slice(),
                "payload": payload(&entry),
            }]
        });
        let response = self
            .request(reqwest::Method::PUT, "/points?wait=true")
            .json(&body)
            .send()
            .await
            .map_err(storage_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    async fn search(&self, plan: &SearchPlan) -> Result<Vec<ScoredRecord>> {
        if plan.query.dim() != self.dimension {
            return Err(Error::InvalidDimension {
                expected: self.dimension,
                actual: plan.query.dim(),
            });
        }
        if plan.limit == 0 {
            return Ok(Vec::new());
        }

        let translated: Vec<Option<Value>> = plan.filters.iter().map(translate_filter).collect();
        let exact = translated.iter().all(Option::is_some);
        let must: Vec<Value> = translated.into_iter().flatten().collect();
        let mut page = if exact {
            plan.limit + OVERFETCH
        } else {
            plan.limit * OVERFETCH
        };

        // Qdrant orders ties arbitrarily, so widen the page until nothing
        // beyond it can still tie with (or beat) the last kept result.
        loop {
            let points = self.search_page(plan, &must, page).await?;
            let full_page = points.len() >= page;

            let mut floor = f32::INFINITY;
            let mut candidates = Vec::with_capacity(points.len());
            for point in points {
                let entry = self.to_entry(point)?;
                // Rescore locally so ties and float noise match the memory store
                let score = plan.query.dot(&entry.vector);
                floor = floor.min(score);
                if plan.filters.as_slice().matches(&entry.record) {
                    candidates.push((entry, score));
                }
            }
            let ranked = top_k(candidates, plan.limit, |c| (c.1, c.0.record.id.as_str()));

            let settled = ranked.len() == plan.limit && ranked[plan.limit - 1].1 > floor;
            if !full_page || settled || page >= MAX_PAGE {
                if full_page && !settled {
                    warn!("Search page capped at {} points; ties at the limit may be incomplete", page);
                }
                return Ok(ranked
                    .into_iter()
                    .map(|(entry, score)| ScoredRecord {
                        space_scores: plan.layout.explain(&plan.query, &entry.vector),
                        record: entry.record,
                        score,
                    })
                    .collect());
            }
            debug!("Widening search page from {} to {}", page, page * 2);
            page = (page * 2).min(MAX_PAGE);
        }
    }

    async fn get(&self, id: &str) -> Result<Option<IndexedRecord>> {
        let path = format!("/points/{}", point_id_path(id));
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(storage_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let point: Envelope<Option<ScoredPoint>> = response.json().await.map_err(storage_error)?;
        point.result.map(|p| self.to_entry(p)).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }
        let response = self
            .request(reqwest::Method::POST, "/points/delete?wait=true")
            .json(&json!({ "points": [point_id(id)] }))
            .send()
            .await
            .map_err(storage_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(true)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .request(reqwest::Method::POST, "/points/count")
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(storage_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let count: Envelope<CountResult> = response.json().await.map_err(storage_error)?;
        Ok(count.result.count)
    }
}

/// Canonical unsigned integer ids are used as-is; anything else, including
/// `"042"` or `"+42"`, maps to a UUIDv5 so distinct ids never share a point
pub fn point_id(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) if n.to_string() == id => json!(n),
        _ => json!(Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()),
    }
}

fn point_id_path(id: &str) -> String {
    match point_id(id) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Flattened attribute used by server-side filters. Text is lowercased and
/// timestamps become unix seconds, matching how local filters compare.
fn filter_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Text(s) => json!(s.to_lowercase()),
        AttributeValue::Number(n) => json!(n),
        AttributeValue::Timestamp(_) => ordering_key(value).map(|s| json!(s)).unwrap_or(Value::Null),
        AttributeValue::Missing => Value::Null,
    }
}

fn payload(entry: &IndexedRecord) -> Value {
    let attrs: Map<String, Value> = entry
        .record
        .attributes
        .iter()
        .filter(|(_, v)| !v.is_missing())
        .map(|(k, v)| (k.clone(), filter_value(v)))
        .collect();
    json!({
        "record": entry.record,
        "version": entry.version,
        "attrs": attrs,
    })
}

/// Translate a condition into a Qdrant filter clause. `None` means the
/// condition can only be evaluated locally.
pub fn translate_filter(condition: &FilterCondition) -> Option<Value> {
    let key = |field: &str| format!("attrs.{}", field);
    let range = |field: &str, op: &str, value: f64| {
        let mut bounds = Map::new();
        bounds.insert(op.to_string(), json!(value));
        json!({ "key": key(field), "range": bounds })
    };
    match condition {
        FilterCondition::Equals { field, value } => match value {
            AttributeValue::Missing => Some(json!({ "is_empty": { "key": key(field) } })),
            AttributeValue::Number(_) | AttributeValue::Timestamp(_) => {
                let n = ordering_key(value)?;
                Some(json!({ "key": key(field), "range": { "gte": n, "lte": n } }))
            }
            other => Some(json!({ "key": key(field), "match": { "value": filter_value(other) } })),
        },
        FilterCondition::NotEquals { field, value } => {
            let inner = translate_filter(&FilterCondition::Equals {
                field: field.clone(),
                value: value.clone(),
            })?;
            Some(json!({ "must_not": [inner] }))
        }
        FilterCondition::GreaterThan { field, value } => Some(range(field, "gt", *value)),
        FilterCondition::GreaterEqual { field, value } => Some(range(field, "gte", *value)),
        FilterCondition::LessThan { field, value } => Some(range(field, "lt", *value)),
        FilterCondition::LessEqual { field, value } => Some(range(field, "lte", *value)),
        FilterCondition::Contains { .. } => None,
        FilterCondition::And(conditions) => {
            let must: Option<Vec<Value>> = conditions.iter().map(translate_filter).collect();
            Some(json!({ "must": must? }))
        }
        FilterCondition::Or(conditions) => {
            let should: Option<Vec<Value>> = conditions.iter().map(translate_filter).collect();
            Some(json!({ "should": should? }))
        }
        FilterCondition::Not(inner) => Some(json!({ "must_not": [translate_filter(inner)?] })),
    }
}

fn storage_error(e: reqwest::Error) -> Error {
    Error::Storage(format!("qdrant request failed: {}", e))
}

async fn status_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Storage(format!("qdrant returned {}: {}", status, body))
}
