//! Listing records and ingestion-boundary coercion

use crate::schema::{AttributeKind, Schema};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Legacy numeric marker for "no value" in upstream listing exports.
/// Recognised at ingestion and stored as [`AttributeValue::Missing`].
pub const MISSING_SENTINEL: f64 = -1.0;

/// Value of a single record attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Missing,
}

impl AttributeValue {
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, AttributeValue::Missing)
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Text(s) => Value::String(s.clone()),
            AttributeValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttributeValue::Timestamp(t) => Value::String(t.to_rfc3339()),
            AttributeValue::Missing => Value::Null,
        }
    }

    /// Coerce a raw JSON value into an attribute of the given kind.
    ///
    /// Handles the shapes listing exports carry: currency strings,
    /// `t`/`f` flags, date strings, unix seconds and the numeric sentinel.
    pub fn coerce(raw: &Value, kind: AttributeKind) -> std::result::Result<Self, String> {
        match kind {
            AttributeKind::Text | AttributeKind::Category => match raw {
                Value::Null => Ok(AttributeValue::Missing),
                Value::String(s) if s.is_empty() => Ok(AttributeValue::Missing),
                Value::String(s) => Ok(AttributeValue::Text(s.clone())),
                Value::Number(n) => Ok(AttributeValue::Text(n.to_string())),
                Value::Bool(b) => Ok(AttributeValue::Text(b.to_string())),
                other => Err(format!("expected text, got {}", other)),
            },
            AttributeKind::Number => {
                let number = match raw {
                    Value::Null => return Ok(AttributeValue::Missing),
                    Value::Number(n) => n.as_f64(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    Value::String(s) => match parse_number_str(s)? {
                        Some(n) => Some(n),
                        None => return Ok(AttributeValue::Missing),
                    },
                    other => return Err(format!("expected number, got {}", other)),
                };
                match number {
                    Some(n) if n.is_nan() => Ok(AttributeValue::Missing),
                    Some(n) if n == MISSING_SENTINEL => Ok(AttributeValue::Missing),
                    Some(n) => Ok(AttributeValue::Number(n)),
                    None => Err("number out of range".to_string()),
                }
            }
            AttributeKind::Timestamp => match raw {
                Value::Null => Ok(AttributeValue::Missing),
                Value::String(s) if s.trim().is_empty() => Ok(AttributeValue::Missing),
                Value::String(s) => parse_timestamp_str(s)
                    .map(AttributeValue::Timestamp)
                    .ok_or_else(|| format!("unparseable timestamp '{}'", s)),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .map(AttributeValue::Timestamp)
                    .ok_or_else(|| format!("invalid unix timestamp {}", n)),
                other => Err(format!("expected timestamp, got {}", other)),
            },
        }
    }
}

fn parse_number_str(raw: &str) -> std::result::Result<Option<f64>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "t" | "true" => return Ok(Some(1.0)),
        "f" | "false" => return Ok(Some(0.0)),
        _ => {}
    }
    let cleaned: String = trimmed
        .trim_start_matches(['$', '€', '£'])
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("unparseable number '{}'", raw))
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS` or a bare `YYYY-MM-DD` (midnight UTC)
pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// One listing: a unique id plus its attribute snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

static MISSING: AttributeValue = AttributeValue::Missing;

impl Record {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, AttributeValue::Text(value.into()))
    }

    #[inline]
    #[must_use]
    pub fn with_number(self, name: impl Into<String>, value: f64) -> Self {
        self.with(name, AttributeValue::Number(value))
    }

    #[inline]
    #[must_use]
    pub fn with_timestamp(self, name: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.with(name, AttributeValue::Timestamp(value))
    }

    /// Attribute value, `Missing` when absent
    pub fn attribute(&self, name: &str) -> &AttributeValue {
        self.attributes.get(name).unwrap_or(&MISSING)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.attribute(name).as_number()
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.attribute(name).as_text()
    }

    /// Build a record from an attribute-name-keyed JSON object.
    ///
    /// Only attributes declared in the schema are kept; undeclared keys are dropped.
    pub fn from_json(schema: &Schema, raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| Error::InvalidRecord("record must be a JSON object".to_string()))?;

        let id = match obj.get(&schema.id_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::InvalidRecord(format!(
                    "missing or empty id field '{}'",
                    schema.id_field
                )))
            }
        };

        let mut record = Record::new(id);
        for field in &schema.fields {
            if field.name == schema.id_field {
                continue;
            }
            let value = match obj.get(&field.name) {
                Some(v) => AttributeValue::coerce(v, field.kind).map_err(|e| {
                    Error::InvalidRecord(format!("record {}: field '{}': {}", record.id, field.name, e))
                })?,
                None => AttributeValue::Missing,
            };
            record.attributes.insert(field.name.clone(), value);
        }
        Ok(record)
    }

    /// Flat JSON object with the id and every attribute; missing values are null
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        for (name, value) in &self.attributes {
            obj.insert(name.clone(), value.to_json());
        }
        Value::Object(obj)
    }
}
