//! Structured queries
//!
//! A [`Query`] is built per request and discarded after execution. Filters
//! exclude records; similarity clauses and space weights only rank them.

use crate::filter::FilterCondition;
use crate::record::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weight applied to any space or clause the caller leaves unset
pub const BASELINE_WEIGHT: f32 = 1.0;

pub const DEFAULT_LIMIT: usize = 10;

/// Scores records by closeness to a reference value in one space
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityClause {
    pub space: String,
    pub value: AttributeValue,
    #[serde(default = "baseline_weight")]
    pub weight: f32,
}

fn baseline_weight() -> f32 {
    BASELINE_WEIGHT
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    /// Per-space weights; absent spaces get [`BASELINE_WEIGHT`]
    #[serde(default)]
    pub weights: BTreeMap<String, f32>,
    #[serde(default)]
    pub clauses: Vec<SimilarityClause>,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            clauses: Vec::new(),
            filters: Vec::new(),
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Query {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_weight(mut self, space: impl Into<String>, weight: f32) -> Self {
        self.weights.insert(space.into(), weight);
        self
    }

    #[must_use]
    pub fn similar(mut self, space: impl Into<String>, value: AttributeValue, weight: f32) -> Self {
        self.clauses.push(SimilarityClause {
            space: space.into(),
            value,
            weight,
        });
        self
    }

    #[must_use]
    pub fn filter(mut self, condition: FilterCondition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn weight_for(&self, space: &str) -> f32 {
        self.weights.get(space).copied().unwrap_or(BASELINE_WEIGHT)
    }
}
