//! Composite multi-space index
//!
//! Encodes each record through every configured space, concatenates the
//! sub-vectors in declared order and hands the result to a [`VectorStore`].
//! Writes to the same id apply in arrival order: each write takes its
//! version when it arrives, encodes without holding any lock, and is
//! dropped at commit time if a later arrival for the id already landed.
//! Distinct ids proceed concurrently.

use crate::embed::Embedder;
use crate::query::Query;
use crate::record::{AttributeValue, Record};
use crate::schema::Schema;
use crate::space::{EncodeContext, Space};
use crate::store::{IndexedRecord, ScoredRecord, SearchPlan, SpaceLayout, VectorStore};
use crate::{Error, Result, Vector};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const WRITE_STRIPES: usize = 64;

/// Per-id write bookkeeping, kept only while writes for the id are in flight
#[derive(Debug, Default)]
struct WriteSlot {
    /// Highest version committed (or deleted) since the slot was opened
    applied: u64,
    in_flight: usize,
}

type Stripe = Mutex<AHashMap<String, WriteSlot>>;

/// What a bulk load does with a record that fails to encode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Skip the record, report it, keep going
    #[default]
    Skip,
    /// Stop at the first failure; records before it stay indexed
    FailFast,
}

/// Configuration for an index
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub name: String,
    pub schema: Schema,
    pub spaces: Vec<Space>,
    /// Reference time for recency spaces, fixed for the index lifetime
    pub now: DateTime<Utc>,
    pub batch_policy: BatchPolicy,
}

impl IndexConfig {
    pub fn new(name: impl Into<String>, schema: Schema, spaces: Vec<Space>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            schema,
            spaces,
            now,
            batch_policy: BatchPolicy::Skip,
        }
    }

    #[must_use]
    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    /// Check space names, bindings and per-space configuration
    pub fn validate(&self) -> Result<()> {
        if self.spaces.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "index '{}' needs at least one space",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for space in &self.spaces {
            space.validate()?;
            if !seen.insert(space.name()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate space name '{}'",
                    space.name()
                )));
            }
            let kind = self.schema.kind_of(space.attribute()).ok_or_else(|| {
                Error::SchemaMismatch(format!(
                    "space '{}' reads unknown attribute '{}'",
                    space.name(),
                    space.attribute()
                ))
            })?;
            if !space.accepts(kind) {
                return Err(Error::SchemaMismatch(format!(
                    "space '{}' cannot read {} attribute '{}'",
                    space.name(),
                    kind.as_str(),
                    space.attribute()
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub indexed: usize,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub id: String,
    pub reason: String,
}

pub struct CompositeIndex {
    config: IndexConfig,
    layout: Arc<SpaceLayout>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    sequence: AtomicU64,
    stripes: Vec<Stripe>,
}

impl CompositeIndex {
    pub fn new(
        config: IndexConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = Arc::new(SpaceLayout::from_spaces(&config.spaces));
        info!(
            "Index '{}' configured: {} spaces, {} dimensions, {} backend",
            config.name,
            config.spaces.len(),
            layout.dimension(),
            store.backend()
        );
        Ok(Self {
            config,
            layout,
            store,
            embedder,
            sequence: AtomicU64::new(1),
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(AHashMap::new())).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn schema(&self) -> &Schema {
        &self.config.schema
    }

    pub fn spaces(&self) -> &[Space] {
        &self.config.spaces
    }

    pub fn space(&self, name: &str) -> Option<&Space> {
        self.config.spaces.iter().find(|s| s.name() == name)
    }

    pub fn dimension(&self) -> usize {
        self.layout.dimension()
    }

    pub fn layout(&self) -> &Arc<SpaceLayout> {
        &self.layout
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.config.now
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    fn context(&self) -> EncodeContext<'_> {
        EncodeContext {
            now: self.config.now,
            embedder: self.embedder.as_ref(),
        }
    }

    fn stripe(&self, id: &str) -> &Stripe {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    /// Encode a record into its composite vector without storing it
    pub async fn encode_record(&self, record: &Record) -> Result<Vector> {
        let ctx = self.context();
        let mut parts = Vec::with_capacity(self.config.spaces.len());
        for space in &self.config.spaces {
            parts.push(space.encode(record.attribute(space.attribute()), &ctx).await?);
        }
        Ok(Vector::concat(parts.iter()))
    }

    /// Index or re-index one record. Nothing is stored if any space fails.
    pub async fn index(&self, record: Record) -> Result<()> {
        if record.id.trim().is_empty() {
            return Err(Error::InvalidRecord("record id cannot be empty".to_string()));
        }
        let stripe = self.stripe(&record.id);
        let version = {
            let mut slots = stripe.lock().await;
            slots.entry(record.id.clone()).or_default().in_flight += 1;
            self.sequence.fetch_add(1, Ordering::SeqCst)
        };

        let encoded = self.encode_record(&record).await;

        let mut slots = stripe.lock().await;
        let result = match encoded {
            Ok(vector) => {
                let superseded = slots.get(&record.id).is_some_and(|s| s.applied > version);
                if superseded {
                    debug!("Dropped record {} version {}: a later write landed", record.id, version);
                    Ok(())
                } else {
                    let id = record.id.clone();
                    let upserted = self
                        .store
                        .upsert(IndexedRecord {
                            record,
                            vector,
                            version,
                        })
                        .await;
                    if upserted.is_ok() {
                        if let Some(slot) = slots.get_mut(&id) {
                            slot.applied = version;
                        }
                        debug!("Indexed record {} (version {})", id, version);
                    }
                    return finish(&mut slots, &id, upserted);
                }
            }
            Err(e) => Err(e),
        };
        finish(&mut slots, &record.id, result)
    }

    /// Index records in order under the configured batch policy
    pub async fn index_batch(&self, records: Vec<Record>) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for record in records {
            let id = record.id.clone();
            match self.index(record).await {
                Ok(()) => report.indexed += 1,
                Err(e) if self.config.batch_policy == BatchPolicy::Skip && !e.is_upstream_error() => {
                    warn!("Skipping record {}: {}", id, e);
                    report.skipped.push(SkippedRecord {
                        id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Build the weighted query vector for a structured query.
    ///
    /// Each space segment is its weight times the clause-weighted sum of its
    /// clause vectors, or times its implicit preference when it has none.
    pub async fn query_vector(&self, query: &Query) -> Result<Vector> {
        for name in query.weights.keys() {
            if self.space(name).is_none() {
                return Err(Error::SchemaMismatch(format!(
                    "weight given for unknown space '{}'",
                    name
                )));
            }
        }
        if let Some((name, w)) = query.weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(Error::InvalidParameter(format!(
                "weight for space '{}' must be a non-negative number, got {}",
                name, w
            )));
        }
        for clause in &query.clauses {
            if !clause.weight.is_finite() || clause.weight < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "clause weight on '{}' must be a non-negative number, got {}",
                    clause.space, clause.weight
                )));
            }
            if self.space(&clause.space).is_none() {
                return Err(Error::SchemaMismatch(format!(
                    "similarity clause on unknown space '{}'",
                    clause.space
                )));
            }
        }

        let ctx = self.context();
        let mut parts = Vec::with_capacity(self.config.spaces.len());
        for space in &self.config.spaces {
            let mut segment = Vector::zeros(space.dimension());
            let mut has_clause = false;
            for clause in query.clauses.iter().filter(|c| c.space == space.name()) {
                if clause.value.is_missing() {
                    continue;
                }
                let reference = space.encode(&clause.value, &ctx).await?;
                segment.add_scaled(&reference, clause.weight);
                has_clause = true;
            }
            if !has_clause {
                if let Some(preference) = space.preference() {
                    segment = preference;
                }
            }
            parts.push(&segment * query.weight_for(space.name()));
        }
        Ok(Vector::concat(parts.iter()))
    }

    /// Filter, score, rank and truncate.
    ///
    /// Filters are validated before anything is encoded or scanned.
    pub async fn search(&self, query: &Query) -> Result<Vec<ScoredRecord>> {
        for filter in &query.filters {
            filter.validate(&self.config.schema)?;
        }
        let vector = self.query_vector(query).await?;
        let plan = SearchPlan {
            query: vector,
            filters: query.filters.clone(),
            limit: query.limit,
            layout: self.layout.clone(),
        };
        self.store.search(&plan).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.store.get(id).await?.map(|e| e.record))
    }

    /// Delete counts as a write: in-flight writes that arrived earlier are dropped
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut slots = self.stripe(id).lock().await;
        let version = self.sequence.fetch_add(1, Ordering::SeqCst);
        if let Some(slot) = slots.get_mut(id) {
            slot.applied = slot.applied.max(version);
        }
        self.store.delete(id).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Encode a single reference value in one space
    pub async fn encode_value(&self, space: &str, value: &AttributeValue) -> Result<Vector> {
        let space = self
            .space(space)
            .ok_or_else(|| Error::SchemaMismatch(format!("unknown space '{}'", space)))?;
        space.encode(value, &self.context()).await
    }
}

/// Close one in-flight write for `id`, dropping the slot when it was the last
fn finish<T>(slots: &mut AHashMap<String, WriteSlot>, id: &str, result: Result<T>) -> Result<T> {
    if let Some(slot) = slots.get_mut(id) {
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if slot.in_flight == 0 {
            slots.remove(id);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::filter::FilterCondition;
    use crate::schema::AttributeKind;
    use crate::space::{CategorySpace, NumberMode, NumberSpace, TextSpace};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn schema() -> Schema {
        Schema::new("listing")
            .with_field("description", AttributeKind::Text)
            .with_field("room_type", AttributeKind::Category)
            .with_field("price", AttributeKind::Number)
            .with_field("review_scores_rating", AttributeKind::Number)
    }

    fn spaces() -> Vec<Space> {
        vec![
            Space::Text(TextSpace::new("description", "description", "test-model", 32)),
            Space::Category(CategorySpace::new(
                "room_type",
                "room_type",
                vec!["Private room".to_string(), "Entire home/apt".to_string()],
            )),
            Space::Number(NumberSpace::new("price", "price", 0.0, 1000.0, NumberMode::Minimum)),
            Space::Number(NumberSpace::new(
                "rating",
                "review_scores_rating",
                0.0,
                5.0,
                NumberMode::Maximum,
            )),
        ]
    }

    fn index() -> CompositeIndex {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        CompositeIndex::new(
            IndexConfig::new("listings", schema(), spaces(), now),
            Arc::new(MemoryStore::new()),
            Arc::new(HashEmbedder::new(32)),
        )
        .unwrap()
    }

    fn listing(id: &str, price: f64, rating: f64) -> Record {
        Record::new(id)
            .with_text("description", "bright flat near the park")
            .with_text("room_type", "Entire home/apt")
            .with_number("price", price)
            .with_number("review_scores_rating", rating)
    }

    #[test]
    fn test_dimension_is_sum_of_spaces() {
        assert_eq!(index().dimension(), 32 + 2 + 2 + 2);
    }

    #[test]
    fn test_config_rejects_unknown_attribute() {
        let mut bad = spaces();
        bad.push(Space::Number(NumberSpace::new("beds", "beds", 0.0, 10.0, NumberMode::Maximum)));
        let err = CompositeIndex::new(
            IndexConfig::new("x", schema(), bad, Utc::now()),
            Arc::new(MemoryStore::new()),
            Arc::new(HashEmbedder::new(32)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn test_config_rejects_duplicate_space() {
        let mut dup = spaces();
        dup.push(dup[2].clone());
        assert!(matches!(
            IndexConfig::new("x", schema(), dup, Utc::now()).validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_reindex_overwrites() {
        let index = index();
        index.index(listing("1", 100.0, 4.0)).await.unwrap();
        index.index(listing("1", 250.0, 4.0)).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let stored = index.get("1").await.unwrap().unwrap();
        assert_eq!(stored.number("price"), Some(250.0));
    }

    #[tokio::test]
    async fn test_failed_encode_leaves_no_entry() {
        let index = index();
        let bad = listing("1", 100.0, 4.0).with_text("room_type", "Castle");
        let err = index.index(bad).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCategory { .. }));
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_skip_reports_failures() {
        let index = index();
        let report = index
            .index_batch(vec![
                listing("1", 100.0, 4.0),
                listing("2", 100.0, 4.0).with_text("room_type", "Castle"),
                listing("3", 100.0, 4.0),
            ])
            .await
            .unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, "2");
    }

    #[tokio::test]
    async fn test_batch_fail_fast_stops() {
        let now = Utc::now();
        let index = CompositeIndex::new(
            IndexConfig::new("listings", schema(), spaces(), now).with_batch_policy(BatchPolicy::FailFast),
            Arc::new(MemoryStore::new()),
            Arc::new(HashEmbedder::new(32)),
        )
        .unwrap();
        let result = index
            .index_batch(vec![
                listing("1", 100.0, 4.0),
                listing("2", 100.0, 4.0).with_text("room_type", "Castle"),
                listing("3", 100.0, 4.0),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_price_minimize_with_filter() {
        let index = index();
        index.index(listing("a", 50.0, 4.9)).await.unwrap();
        index.index(listing("b", 150.0, 3.0)).await.unwrap();
        index.index(listing("c", 500.0, 4.5)).await.unwrap();

        let query = Query::new(10)
            .with_weight("price", 1.0)
            .with_weight("rating", 0.0)
            .filter(FilterCondition::LessEqual {
                field: "price".to_string(),
                value: 200.0,
            });
        let results = index.search(&query).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_filter_attribute_rejected() {
        let index = index();
        index.index(listing("a", 50.0, 4.9)).await.unwrap();
        let query = Query::new(10).filter(FilterCondition::GreaterThan {
            field: "stars".to_string(),
            value: 3.0,
        });
        assert!(matches!(index.search(&query).await, Err(Error::InvalidFilter(_))));
    }

    #[tokio::test]
    async fn test_negative_weight_rejected() {
        let index = index();
        let query = Query::new(10).with_weight("rating", -1.0);
        assert!(matches!(index.search(&query).await, Err(Error::InvalidParameter(_))));

        let query = Query::new(10).similar("description", AttributeValue::Text("loft".to_string()), -0.5);
        assert!(matches!(index.search(&query).await, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_unknown_clause_space_rejected() {
        let index = index();
        let query = Query::new(10).similar("vibe", AttributeValue::Text("cozy".to_string()), 1.0);
        assert!(matches!(index.search(&query).await, Err(Error::SchemaMismatch(_))));
    }

    #[tokio::test]
    async fn test_text_clause_ranks_matching_description() {
        let index = index();
        index
            .index(listing("pool", 100.0, 4.0).with_text("description", "villa with private pool and garden"))
            .await
            .unwrap();
        index
            .index(listing("desk", 100.0, 4.0).with_text("description", "studio with desk for remote work"))
            .await
            .unwrap();

        let query = Query::new(2)
            .with_weight("price", 0.0)
            .with_weight("rating", 0.0)
            .similar("description", AttributeValue::Text("pool and garden".to_string()), 1.0);
        let results = index.search(&query).await.unwrap();
        assert_eq!(results[0].record.id, "pool");
    }

    #[tokio::test]
    async fn test_equal_scores_break_ties_by_id() {
        let index = index();
        for id in ["c", "a", "b"] {
            index.index(listing(id, 100.0, 4.0)).await.unwrap();
        }
        let results = index.search(&Query::new(10)).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    /// Parks any text containing "slow" until released
    struct GatedEmbedder {
        inner: HashEmbedder,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl Embedder for GatedEmbedder {
        async fn embed(&self, text: &str, model: &str) -> Result<Vector> {
            if text.contains("slow") {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.embed(text, model).await
        }
    }

    #[tokio::test]
    async fn test_same_id_last_arrival_wins() {
        let embedder = Arc::new(GatedEmbedder {
            inner: HashEmbedder::new(32),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let index = Arc::new(
            CompositeIndex::new(
                IndexConfig::new("listings", schema(), spaces(), Utc::now()),
                Arc::new(MemoryStore::new()),
                embedder.clone(),
            )
            .unwrap(),
        );
        index.index(listing("1", 50.0, 4.0)).await.unwrap();

        let first = {
            let index = index.clone();
            tokio::spawn(async move {
                index
                    .index(listing("1", 100.0, 4.0).with_text("description", "slow loft"))
                    .await
            })
        };
        embedder.entered.notified().await;

        // the later arrival is not held up by the parked one
        index
            .index(listing("1", 200.0, 4.0).with_text("description", "fast loft"))
            .await
            .unwrap();

        let seen = index.search(&Query::new(10)).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].record.number("price"), Some(200.0));
        assert_eq!(seen[0].record.text("description"), Some("fast loft"));

        embedder.release.notify_one();
        first.await.unwrap().unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let stored = index.get("1").await.unwrap().unwrap();
        assert_eq!(stored.number("price"), Some(200.0));
        assert_eq!(stored.text("description"), Some("fast loft"));
    }

    #[tokio::test]
    async fn test_delete_drops_earlier_in_flight_write() {
        let embedder = Arc::new(GatedEmbedder {
            inner: HashEmbedder::new(32),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let index = Arc::new(
            CompositeIndex::new(
                IndexConfig::new("listings", schema(), spaces(), Utc::now()),
                Arc::new(MemoryStore::new()),
                embedder.clone(),
            )
            .unwrap(),
        );
        let write = {
            let index = index.clone();
            tokio::spawn(async move {
                index
                    .index(listing("9", 100.0, 4.0).with_text("description", "slow cabin"))
                    .await
            })
        };
        embedder.entered.notified().await;
        assert!(!index.delete("9").await.unwrap());

        embedder.release.notify_one();
        write.await.unwrap().unwrap();
        assert!(index.get("9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writes_distinct_ids() {
        let index = Arc::new(index());
        let mut handles = Vec::new();
        for i in 0..32 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                index.index(listing(&format!("id-{i}"), 10.0 * i as f64, 4.0)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(index.count().await.unwrap(), 32);
    }
}
