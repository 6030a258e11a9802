//! Vector storage seam and the in-process store
//!
//! Scoring is a single dot product between the weighted query vector and a
//! record's composite vector, so any backend that can rank by dot product
//! with hard filters can serve a [`SearchPlan`].

use crate::filter::{Filter, FilterCondition};
use crate::record::Record;
use crate::space::Space;
use crate::{Error, Result, Vector};
use ahash::AHashMap;
use async_trait::async_trait;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

/// Below this many entries scoring stays on the calling thread
const PARALLEL_THRESHOLD: usize = 2048;

/// Position of one space's sub-vector inside the composite vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub space: String,
    pub offset: usize,
    pub dim: usize,
}

impl Segment {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.dim
    }
}

/// Ordered segments of the composite vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceLayout {
    segments: Vec<Segment>,
    dim: usize,
}

impl SpaceLayout {
    pub fn from_spaces(spaces: &[Space]) -> Self {
        let mut offset = 0;
        let segments = spaces
            .iter()
            .map(|space| {
                let segment = Segment {
                    space: space.name().to_string(),
                    offset,
                    dim: space.dimension(),
                };
                offset += segment.dim;
                segment
            })
            .collect();
        Self {
            segments,
            dim: offset,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, space: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.space == space)
    }

    /// Per-space contribution to the total score
    pub fn explain(&self, query: &Vector, vector: &Vector) -> BTreeMap<String, f32> {
        if query.dim() != self.dim || vector.dim() != self.dim {
            return BTreeMap::new();
        }
        self.segments
            .iter()
            .map(|s| (s.space.clone(), query.dot_range(vector, s.range())))
            .collect()
    }
}

/// A record with its composite vector and arrival version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    pub record: Record,
    pub vector: Vector,
    /// Arrival order of the write; an older version never replaces a newer one
    #[serde(default)]
    pub version: u64,
}

/// Everything a backend needs to answer one search
#[derive(Debug, Clone)]
pub struct SearchPlan {
    /// Weighted query vector in composite layout
    pub query: Vector,
    pub filters: Vec<FilterCondition>,
    pub limit: usize,
    pub layout: Arc<SpaceLayout>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f32,
    /// Per-space contributions, summing to `score`
    pub space_scores: BTreeMap<String, f32>,
}

/// Pluggable storage for composite vectors.
///
/// Implementations must make `upsert` an atomic replace and must serve
/// `search` from a consistent view of each entry.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and index info
    fn backend(&self) -> &'static str;

    async fn upsert(&self, entry: IndexedRecord) -> Result<()>;

    async fn search(&self, plan: &SearchPlan) -> Result<Vec<ScoredRecord>>;

    async fn get(&self, id: &str) -> Result<Option<IndexedRecord>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;
}

/// Keep the best `limit` items: descending score, ties by ascending id
pub fn top_k<T, F>(mut items: Vec<T>, limit: usize, key: F) -> Vec<T>
where
    F: Fn(&T) -> (f32, &str),
{
    if limit == 0 {
        return Vec::new();
    }
    let cmp = |a: &T, b: &T| {
        let (score_a, id_a) = key(a);
        let (score_b, id_b) = key(b);
        OrderedFloat(score_b)
            .cmp(&OrderedFloat(score_a))
            .then_with(|| id_a.cmp(id_b))
    };
    if items.len() > limit {
        items.select_nth_unstable_by(limit, cmp);
        items.truncate(limit);
    }
    items.sort_by(cmp);
    items
}

/// In-process store: id -> shared entry behind a reader-writer lock.
///
/// Writers swap whole `Arc`s, so a reader sees either the old or the new
/// entry. Searches clone the handles under a short read lock and score
/// outside it.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<AHashMap<String, Arc<IndexedRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Insert unless a newer version is already stored; returns whether it was applied
    pub fn put(&self, entry: IndexedRecord) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&entry.record.id) {
            Some(existing) if existing.version > entry.version => false,
            _ => {
                entries.insert(entry.record.id.clone(), Arc::new(entry));
                true
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<IndexedRecord>> {
        self.entries.read().values().cloned().collect()
    }

    /// Owned copy of every entry, sorted by id
    pub fn export(&self) -> Vec<IndexedRecord> {
        let mut all: Vec<IndexedRecord> = self.snapshot().iter().map(|e| (**e).clone()).collect();
        all.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        all
    }

    /// Replace the whole content. Restored entries drop to version 0 so any
    /// later write through a fresh index supersedes them.
    pub fn restore(&self, entries: Vec<IndexedRecord>) {
        let map = entries
            .into_iter()
            .map(|mut e| {
                e.version = 0;
                (e.record.id.clone(), Arc::new(e))
            })
            .collect();
        *self.entries.write() = map;
    }

    pub fn search_sync(&self, plan: &SearchPlan) -> Result<Vec<ScoredRecord>> {
        if plan.query.dim() != plan.layout.dimension() {
            return Err(Error::InvalidDimension {
                expected: plan.layout.dimension(),
                actual: plan.query.dim(),
            });
        }

        let snapshot = self.snapshot();
        let score = |entry: &Arc<IndexedRecord>| {
            if plan.filters.as_slice().matches(&entry.record) {
                Some((entry.clone(), plan.query.dot(&entry.vector)))
            } else {
                None
            }
        };

        let candidates: Vec<(Arc<IndexedRecord>, f32)> = if snapshot.len() >= PARALLEL_THRESHOLD {
            snapshot.par_iter().filter_map(score).collect()
        } else {
            snapshot.iter().filter_map(score).collect()
        };

        let top = top_k(candidates, plan.limit, |c| (c.1, c.0.record.id.as_str()));
        Ok(top
            .into_iter()
            .map(|(entry, score)| ScoredRecord {
                space_scores: plan.layout.explain(&plan.query, &entry.vector),
                record: entry.record.clone(),
                score,
            })
            .collect())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, entry: IndexedRecord) -> Result<()> {
        if !self.put(entry) {
            tracing::debug!("Dropped stale write superseded by a newer version");
        }
        Ok(())
    }

    async fn search(&self, plan: &SearchPlan) -> Result<Vec<ScoredRecord>> {
        self.search_sync(plan)
    }

    async fn get(&self, id: &str) -> Result<Option<IndexedRecord>> {
        Ok(self.entries.read().get(id).map(|e| (**e).clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }
}
