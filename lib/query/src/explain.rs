// Response shapes for executed searches
use crate::params::Params;
use serde::Serialize;
use serde_json::Value;
use staysearch_core::ScoredRecord;
use std::collections::BTreeMap;

/// One ranked result: the record, its score and per-space contributions
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub object: Value,
    pub score: f32,
    pub explain: BTreeMap<String, f32>,
}

impl From<ScoredRecord> for SearchHit {
    fn from(scored: ScoredRecord) -> Self {
        Self {
            object: scored.record.to_json(),
            score: scored.score,
            explain: scored.space_scores,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub query: String,
    pub limit: usize,
    pub returned: usize,
    pub took_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_query: Option<String>,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub translated: Params,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub stats: SearchStats,
}

impl SearchResponse {
    pub fn ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter_map(|hit| hit.object.get("id").and_then(Value::as_str))
            .collect()
    }
}
