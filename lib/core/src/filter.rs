// Hard filters over a record's attribute snapshot
use crate::record::{AttributeValue, Record};
use crate::schema::{AttributeKind, Schema};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub trait Filter {
    fn matches(&self, record: &Record) -> bool;
}

/// Comparison operator of a filter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl Comparator {
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Comparator::Gt | Comparator::Ge | Comparator::Lt | Comparator::Le
        )
    }
}

/// A hard boolean predicate. Numeric comparisons are done on `f64`;
/// timestamps compare as unix seconds. A missing value never satisfies
/// an ordering comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FilterCondition {
    Equals { field: String, value: AttributeValue },
    NotEquals { field: String, value: AttributeValue },
    GreaterThan { field: String, value: f64 },
    LessThan { field: String, value: f64 },
    GreaterEqual { field: String, value: f64 },
    LessEqual { field: String, value: f64 },
    Contains { field: String, value: String },
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
    Not(Box<FilterCondition>),
}

impl FilterCondition {
    /// Build a single-field condition from a comparator and threshold
    pub fn compare(field: impl Into<String>, op: Comparator, threshold: AttributeValue) -> Result<Self> {
        let field = field.into();
        if op.is_ordering() {
            let value = ordering_key(&threshold).ok_or_else(|| {
                Error::InvalidFilter(format!(
                    "'{}' needs a numeric or timestamp threshold, got {:?}",
                    field, threshold
                ))
            })?;
            return Ok(match op {
                Comparator::Gt => FilterCondition::GreaterThan { field, value },
                Comparator::Ge => FilterCondition::GreaterEqual { field, value },
                Comparator::Lt => FilterCondition::LessThan { field, value },
                _ => FilterCondition::LessEqual { field, value },
            });
        }
        Ok(match op {
            Comparator::Eq => FilterCondition::Equals { field, value: threshold },
            Comparator::Ne => FilterCondition::NotEquals { field, value: threshold },
            _ => match threshold {
                AttributeValue::Text(value) => FilterCondition::Contains { field, value },
                other => {
                    return Err(Error::InvalidFilter(format!(
                        "'{}' contains needs a text value, got {:?}",
                        field, other
                    )))
                }
            },
        })
    }

    /// Check attribute names and threshold types against the schema
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let kind_of = |field: &str| {
            schema
                .kind_of(field)
                .ok_or_else(|| Error::InvalidFilter(format!("unknown attribute '{}'", field)))
        };
        match self {
            FilterCondition::Equals { field, value } | FilterCondition::NotEquals { field, value } => {
                let kind = kind_of(field)?;
                let ok = match (kind, value) {
                    (_, AttributeValue::Missing) => true,
                    (AttributeKind::Text | AttributeKind::Category, AttributeValue::Text(_)) => true,
                    (AttributeKind::Number, AttributeValue::Number(_)) => true,
                    (AttributeKind::Timestamp, AttributeValue::Timestamp(_)) => true,
                    _ => false,
                };
                if !ok {
                    return Err(type_error(field, kind, value));
                }
                Ok(())
            }
            FilterCondition::GreaterThan { field, .. }
            | FilterCondition::LessThan { field, .. }
            | FilterCondition::GreaterEqual { field, .. }
            | FilterCondition::LessEqual { field, .. } => match kind_of(field)? {
                AttributeKind::Number | AttributeKind::Timestamp => Ok(()),
                kind => Err(Error::InvalidFilter(format!(
                    "'{}' is a {} attribute and cannot be range-compared",
                    field,
                    kind.as_str()
                ))),
            },
            FilterCondition::Contains { field, .. } => match kind_of(field)? {
                AttributeKind::Text | AttributeKind::Category => Ok(()),
                kind => Err(Error::InvalidFilter(format!(
                    "'{}' is a {} attribute and cannot be substring-matched",
                    field,
                    kind.as_str()
                ))),
            },
            FilterCondition::And(conditions) | FilterCondition::Or(conditions) => {
                conditions.iter().try_for_each(|c| c.validate(schema))
            }
            FilterCondition::Not(condition) => condition.validate(schema),
        }
    }

    fn matches_condition(condition: &FilterCondition, record: &Record) -> bool {
        match condition {
            FilterCondition::Equals { field, value } => {
                values_equal(record.attribute(field), value)
            }
            FilterCondition::NotEquals { field, value } => {
                !values_equal(record.attribute(field), value)
            }
            FilterCondition::GreaterThan { field, value } => ordering_key(record.attribute(field))
                .map(|v| v > *value)
                .unwrap_or(false),
            FilterCondition::LessThan { field, value } => ordering_key(record.attribute(field))
                .map(|v| v < *value)
                .unwrap_or(false),
            FilterCondition::GreaterEqual { field, value } => ordering_key(record.attribute(field))
                .map(|v| v >= *value)
                .unwrap_or(false),
            FilterCondition::LessEqual { field, value } => ordering_key(record.attribute(field))
                .map(|v| v <= *value)
                .unwrap_or(false),
            FilterCondition::Contains { field, value } => record
                .text(field)
                .map(|v| v.to_lowercase().contains(&value.to_lowercase()))
                .unwrap_or(false),
            FilterCondition::And(conditions) => {
                conditions.iter().all(|c| Self::matches_condition(c, record))
            }
            FilterCondition::Or(conditions) => {
                conditions.iter().any(|c| Self::matches_condition(c, record))
            }
            FilterCondition::Not(condition) => !Self::matches_condition(condition, record),
        }
    }
}

impl Filter for FilterCondition {
    fn matches(&self, record: &Record) -> bool {
        Self::matches_condition(self, record)
    }
}

impl Filter for [FilterCondition] {
    fn matches(&self, record: &Record) -> bool {
        self.iter().all(|c| c.matches(record))
    }
}

/// Numeric view used by ordering comparisons
pub fn ordering_key(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::Timestamp(t) => Some(t.timestamp() as f64),
        _ => None,
    }
}

fn values_equal(actual: &AttributeValue, expected: &AttributeValue) -> bool {
    match (actual, expected) {
        // Category labels compare case-insensitively
        (AttributeValue::Text(a), AttributeValue::Text(b)) => a.eq_ignore_ascii_case(b),
        (a, b) => a == b,
    }
}

fn type_error(field: &str, kind: AttributeKind, value: &AttributeValue) -> Error {
    Error::InvalidFilter(format!(
        "'{}' is a {} attribute but the filter value is {:?}",
        field,
        kind.as_str(),
        value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new("listing")
            .with_field("price", AttributeKind::Number)
            .with_field("room_type", AttributeKind::Category)
            .with_field("amenities", AttributeKind::Text)
    }

    fn record(price: Option<f64>) -> Record {
        let r = Record::new("1")
            .with_text("room_type", "Private room")
            .with_text("amenities", "Wifi, Kitchen, Washer");
        match price {
            Some(p) => r.with_number("price", p),
            None => r.with("price", AttributeValue::Missing),
        }
    }

    #[test]
    fn test_range_filters() {
        let le = FilterCondition::compare("price", Comparator::Le, AttributeValue::Number(200.0)).unwrap();
        assert!(le.matches(&record(Some(150.0))));
        assert!(le.matches(&record(Some(200.0))));
        assert!(!le.matches(&record(Some(500.0))));
    }

    #[test]
    fn test_missing_never_satisfies_ordering() {
        for op in [Comparator::Gt, Comparator::Ge, Comparator::Lt, Comparator::Le] {
            let f = FilterCondition::compare("price", op, AttributeValue::Number(0.0)).unwrap();
            assert!(!f.matches(&record(None)));
        }
    }

    #[test]
    fn test_equals_case_insensitive_and_contains() {
        let eq = FilterCondition::Equals {
            field: "room_type".to_string(),
            value: AttributeValue::Text("private ROOM".to_string()),
        };
        assert!(eq.matches(&record(None)));

        let contains = FilterCondition::compare(
            "amenities",
            Comparator::Contains,
            AttributeValue::Text("kitchen".to_string()),
        )
        .unwrap();
        assert!(contains.matches(&record(None)));
    }

    #[test]
    fn test_boolean_combinators() {
        let cheap = FilterCondition::LessThan { field: "price".to_string(), value: 100.0 };
        let private = FilterCondition::Equals {
            field: "room_type".to_string(),
            value: AttributeValue::Text("Private room".to_string()),
        };
        let both = FilterCondition::And(vec![cheap.clone(), private.clone()]);
        let either = FilterCondition::Or(vec![cheap.clone(), private]);
        let not_cheap = FilterCondition::Not(Box::new(cheap));

        let r = record(Some(150.0));
        assert!(!both.matches(&r));
        assert!(either.matches(&r));
        assert!(not_cheap.matches(&r));
    }

    #[test]
    fn test_validate_unknown_attribute() {
        let f = FilterCondition::GreaterThan { field: "stars".to_string(), value: 3.0 };
        assert!(matches!(f.validate(&schema()), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn test_validate_type_mismatch() {
        let f = FilterCondition::Equals {
            field: "price".to_string(),
            value: AttributeValue::Text("cheap".to_string()),
        };
        assert!(matches!(f.validate(&schema()), Err(Error::InvalidFilter(_))));

        let f = FilterCondition::GreaterThan { field: "room_type".to_string(), value: 1.0 };
        assert!(matches!(f.validate(&schema()), Err(Error::InvalidFilter(_))));

        let nested = FilterCondition::Not(Box::new(FilterCondition::Contains {
            field: "price".to_string(),
            value: "1".to_string(),
        }));
        assert!(matches!(nested.validate(&schema()), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn test_compare_rejects_text_threshold_for_ordering() {
        let err = FilterCondition::compare("price", Comparator::Lt, AttributeValue::Text("x".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_slice_filter_is_conjunction() {
        let filters = vec![
            FilterCondition::GreaterEqual { field: "price".to_string(), value: 100.0 },
            FilterCondition::LessEqual { field: "price".to_string(), value: 200.0 },
        ];
        assert!(filters.as_slice().matches(&record(Some(150.0))));
        assert!(!filters.as_slice().matches(&record(Some(250.0))));
    }
}
