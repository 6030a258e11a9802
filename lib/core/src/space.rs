//! Space encoders
//!
//! A space maps one record attribute to a fixed-length vector under a
//! similarity or ordering semantic. The closed set of variants lives in
//! [`Space`]; every variant reports its dimension and encodes values
//! through the same [`Space::encode`] entry point.
//!
//! Number and recency spaces place a normalized position `x` in `[0, 1]`
//! on a quarter arc, `θ = π/8 + x·π/4`, and encode `[cos θ, sin θ]`.
//! The maximize preference `[0, 1]` scores `sin θ`, increasing in `x`;
//! the minimize preference `[1, 0]` scores `cos θ`, decreasing in `x`.
//! Missing values encode as the zero vector and so score 0, below
//! `sin(π/8)` which is the floor for any real value.

use crate::embed::Embedder;
use crate::record::AttributeValue;
use crate::schema::AttributeKind;
use crate::{Error, Result, Vector};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const ARC_START: f64 = PI / 8.0;
const ARC_SPAN: f64 = PI / 4.0;

/// Dimension of the arc encoding shared by number and recency spaces
pub const ARC_DIM: usize = 2;

fn arc(position: f64) -> Vector {
    let theta = ARC_START + position.clamp(0.0, 1.0) * ARC_SPAN;
    Vector::new(vec![theta.cos() as f32, theta.sin() as f32])
}

/// Preference vector that grows with the arc position
fn arc_max() -> Vector {
    Vector::new(vec![0.0, 1.0])
}

/// Preference vector that shrinks with the arc position
fn arc_min() -> Vector {
    Vector::new(vec![1.0, 0.0])
}

/// Similarity or ordering semantic of a space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpaceKind {
    EmbeddingSimilarity,
    NumericMaximize,
    NumericMinimize,
    CategoricalMatch,
    RecencyDecay,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NumberMode {
    /// Larger raw values rank higher
    Maximum,
    /// Smaller raw values rank higher
    Minimum,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NumberScale {
    #[default]
    Linear,
    /// `ln(1 + v - min) / ln(1 + max - min)`, for ranges spanning decades
    Logarithmic,
}

/// What a categorical space does with a label outside its category set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCategoryPolicy {
    /// Fail with [`Error::UnknownCategory`]
    #[default]
    Reject,
    /// Map to a dedicated "other" slot
    Other,
}

/// Inputs shared by all encoders for one indexing or query pass
#[derive(Clone, Copy)]
pub struct EncodeContext<'a> {
    /// Reference "now" for recency; never read from the wall clock here
    pub now: DateTime<Utc>,
    pub embedder: &'a dyn Embedder,
}

/// Text similarity through an external embedding model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextSpace {
    pub name: String,
    pub attribute: String,
    /// Embedding model identity; vectors from different identities never mix
    pub model: String,
    pub dim: usize,
}

impl TextSpace {
    pub fn new(
        name: impl Into<String>,
        attribute: impl Into<String>,
        model: impl Into<String>,
        dim: usize,
    ) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            model: model.into(),
            dim,
        }
    }

    /// Validate and normalize a provider embedding
    pub fn accept_embedding(&self, embedding: Vector) -> Result<Vector> {
        if embedding.dim() != self.dim {
            return Err(Error::EmbeddingUnavailable(format!(
                "model '{}' returned {} dimensions for space '{}', expected {}",
                self.model,
                embedding.dim(),
                self.name,
                self.dim
            )));
        }
        Ok(embedding.normalized())
    }

    pub async fn encode_text(&self, text: Option<&str>, embedder: &dyn Embedder) -> Result<Vector> {
        match text.map(str::trim) {
            Some(t) if !t.is_empty() => {
                let embedding = embedder.embed(t, &self.model).await?;
                self.accept_embedding(embedding)
            }
            _ => Ok(Vector::zeros(self.dim)),
        }
    }
}

/// Numeric preference within a clamping range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumberSpace {
    pub name: String,
    pub attribute: String,
    pub min_value: f64,
    pub max_value: f64,
    pub mode: NumberMode,
    #[serde(default)]
    pub scale: NumberScale,
}

impl NumberSpace {
    pub fn new(
        name: impl Into<String>,
        attribute: impl Into<String>,
        min_value: f64,
        max_value: f64,
        mode: NumberMode,
    ) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            min_value,
            max_value,
            mode,
            scale: NumberScale::Linear,
        }
    }

    #[must_use]
    pub fn with_scale(mut self, scale: NumberScale) -> Self {
        self.scale = scale;
        self
    }

    /// Clamp into `[min_value, max_value]` and map to `[0, 1]`
    pub fn position(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min_value, self.max_value);
        let offset = clamped - self.min_value;
        let range = self.max_value - self.min_value;
        match self.scale {
            NumberScale::Linear => offset / range,
            NumberScale::Logarithmic => offset.ln_1p() / range.ln_1p(),
        }
    }

    pub fn encode_number(&self, value: Option<f64>) -> Vector {
        match value {
            Some(v) if v.is_finite() => arc(self.position(v)),
            _ => Vector::zeros(ARC_DIM),
        }
    }

    pub fn preference(&self) -> Vector {
        match self.mode {
            NumberMode::Maximum => arc_max(),
            NumberMode::Minimum => arc_min(),
        }
    }
}

/// One-hot match over a closed category set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorySpace {
    pub name: String,
    pub attribute: String,
    pub categories: Vec<String>,
    #[serde(default)]
    pub unknown: UnknownCategoryPolicy,
}

impl CategorySpace {
    pub fn new(
        name: impl Into<String>,
        attribute: impl Into<String>,
        categories: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            categories,
            unknown: UnknownCategoryPolicy::Reject,
        }
    }

    #[must_use]
    pub fn with_unknown_policy(mut self, policy: UnknownCategoryPolicy) -> Self {
        self.unknown = policy;
        self
    }

    pub fn dim(&self) -> usize {
        match self.unknown {
            UnknownCategoryPolicy::Reject => self.categories.len(),
            UnknownCategoryPolicy::Other => self.categories.len() + 1,
        }
    }

    pub fn slot(&self, label: &str) -> Option<usize> {
        self.categories
            .iter()
            .position(|c| c.eq_ignore_ascii_case(label.trim()))
    }

    pub fn encode_category(&self, label: Option<&str>) -> Result<Vector> {
        let mut v = Vector::zeros(self.dim());
        let Some(label) = label else {
            return Ok(v);
        };
        let slot = match (self.slot(label), self.unknown) {
            (Some(slot), _) => slot,
            (None, UnknownCategoryPolicy::Other) => self.categories.len(),
            (None, UnknownCategoryPolicy::Reject) => {
                return Err(Error::UnknownCategory {
                    space: self.name.clone(),
                    value: label.to_string(),
                })
            }
        };
        v.as_mut_slice()[slot] = 1.0;
        Ok(v)
    }
}

/// Exponential recency decay relative to a reference time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecencySpace {
    pub name: String,
    pub attribute: String,
    pub half_life_secs: i64,
}

impl RecencySpace {
    pub fn new(name: impl Into<String>, attribute: impl Into<String>, half_life: Duration) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            half_life_secs: half_life.num_seconds(),
        }
    }

    /// `0.5^(age / half_life)`; timestamps after `now` count as age zero
    pub fn decay(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age = (now - timestamp).num_seconds().max(0) as f64;
        0.5f64.powf(age / self.half_life_secs as f64)
    }

    pub fn encode_timestamp(&self, timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Vector {
        match timestamp {
            Some(ts) => arc(self.decay(ts, now)),
            None => Vector::zeros(ARC_DIM),
        }
    }
}

/// A configured attribute-to-vector transformation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Space {
    Text(TextSpace),
    Number(NumberSpace),
    Category(CategorySpace),
    Recency(RecencySpace),
}

impl Space {
    pub fn name(&self) -> &str {
        match self {
            Space::Text(s) => &s.name,
            Space::Number(s) => &s.name,
            Space::Category(s) => &s.name,
            Space::Recency(s) => &s.name,
        }
    }

    pub fn attribute(&self) -> &str {
        match self {
            Space::Text(s) => &s.attribute,
            Space::Number(s) => &s.attribute,
            Space::Category(s) => &s.attribute,
            Space::Recency(s) => &s.attribute,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Space::Text(s) => s.dim,
            Space::Number(_) | Space::Recency(_) => ARC_DIM,
            Space::Category(s) => s.dim(),
        }
    }

    pub fn kind(&self) -> SpaceKind {
        match self {
            Space::Text(_) => SpaceKind::EmbeddingSimilarity,
            Space::Number(s) => match s.mode {
                NumberMode::Maximum => SpaceKind::NumericMaximize,
                NumberMode::Minimum => SpaceKind::NumericMinimize,
            },
            Space::Category(_) => SpaceKind::CategoricalMatch,
            Space::Recency(_) => SpaceKind::RecencyDecay,
        }
    }

    /// Attribute kinds this space can read
    pub fn accepts(&self, kind: AttributeKind) -> bool {
        match self {
            Space::Text(_) => kind == AttributeKind::Text,
            Space::Number(_) => kind == AttributeKind::Number,
            Space::Category(_) => matches!(kind, AttributeKind::Category | AttributeKind::Text),
            Space::Recency(_) => kind == AttributeKind::Timestamp,
        }
    }

    /// Query vector used when a query weights this space without a clause
    pub fn preference(&self) -> Option<Vector> {
        match self {
            Space::Number(s) => Some(s.preference()),
            Space::Recency(_) => Some(arc_max()),
            Space::Text(_) | Space::Category(_) => None,
        }
    }

    /// Check the configuration itself; attribute binding is checked by the index
    pub fn validate(&self) -> Result<()> {
        if self.name().is_empty() {
            return Err(Error::InvalidConfig("space name cannot be empty".to_string()));
        }
        match self {
            Space::Text(s) if s.dim == 0 => Err(Error::InvalidConfig(format!(
                "text space '{}' must have a non-zero dimension",
                s.name
            ))),
            Space::Number(s) if !(s.min_value < s.max_value) => Err(Error::InvalidConfig(format!(
                "number space '{}' needs min_value < max_value",
                s.name
            ))),
            Space::Category(s) if s.categories.is_empty() => Err(Error::InvalidConfig(format!(
                "category space '{}' needs at least one category",
                s.name
            ))),
            Space::Recency(s) if s.half_life_secs <= 0 => Err(Error::InvalidConfig(format!(
                "recency space '{}' needs a positive half-life",
                s.name
            ))),
            _ => Ok(()),
        }
    }

    /// Encode one attribute value (record side or query reference)
    pub async fn encode(&self, value: &AttributeValue, ctx: &EncodeContext<'_>) -> Result<Vector> {
        let mismatch = || {
            Error::InvalidRecord(format!(
                "space '{}' cannot encode value {:?}",
                self.name(),
                value
            ))
        };
        match (self, value) {
            (Space::Text(s), AttributeValue::Text(t)) => s.encode_text(Some(t), ctx.embedder).await,
            (Space::Text(s), AttributeValue::Missing) => Ok(Vector::zeros(s.dim)),
            (Space::Number(s), AttributeValue::Number(n)) => Ok(s.encode_number(Some(*n))),
            (Space::Number(s), AttributeValue::Missing) => Ok(s.encode_number(None)),
            (Space::Category(s), AttributeValue::Text(t)) => s.encode_category(Some(t)),
            (Space::Category(s), AttributeValue::Missing) => s.encode_category(None),
            (Space::Recency(s), AttributeValue::Timestamp(ts)) => {
                Ok(s.encode_timestamp(Some(*ts), ctx.now))
            }
            (Space::Recency(s), AttributeValue::Missing) => Ok(s.encode_timestamp(None, ctx.now)),
            _ => Err(mismatch()),
        }
    }
}
