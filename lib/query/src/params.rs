// Request parameter coercion
use serde_json::{Map, Value};
use staysearch_core::record::parse_timestamp_str;
use staysearch_core::{AttributeKind, AttributeValue, Error, Result};

/// Flat parameter map as received from a request body
pub type Params = Map<String, Value>;

/// Treat JSON null and blank strings as "not given"
pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Strict number: JSON numbers and numeric strings only
pub fn strict_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// First number appearing in a phrase such as "under $1,200 a night"
pub fn first_number(text: &str) -> Option<f64> {
    let mut digits = String::new();
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in text.chars() {
        match c {
            '0'..='9' => {
                digits.push(c);
                seen_digit = true;
            }
            ',' if seen_digit => {}
            '.' if seen_digit && !seen_dot => {
                digits.push(c);
                seen_dot = true;
            }
            _ if seen_digit => break,
            _ => {}
        }
    }
    digits.trim_end_matches('.').parse().ok()
}

/// Lenient number for translator output: numbers, numeric strings or phrases
pub fn loose_number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => strict_number(value).or_else(|| first_number(s)),
        other => strict_number(other),
    }
}

/// A non-negative finite weight. A negative weight would rank missing
/// values (zero vectors) above every real value.
pub fn weight(name: &str, value: &Value) -> Result<f32> {
    let w = strict_number(value).ok_or_else(|| {
        Error::InvalidParameter(format!("'{}' must be a number, got {}", name, value))
    })?;
    if !w.is_finite() {
        return Err(Error::InvalidParameter(format!("'{}' must be finite", name)));
    }
    if w < 0.0 {
        return Err(Error::InvalidParameter(format!(
            "'{}' must not be negative, got {}",
            name, w
        )));
    }
    Ok(w as f32)
}

pub fn limit(value: &Value) -> Result<usize> {
    let n = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(Error::InvalidParameter(format!(
            "'limit' must be a positive integer, got {}",
            value
        ))),
    }
}

pub fn text(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::InvalidParameter(format!(
            "'{}' must be a string, got {}",
            name, other
        ))),
    }
}

/// Filter threshold typed by the filtered attribute
pub fn threshold(name: &str, kind: AttributeKind, value: &Value) -> Result<AttributeValue> {
    let invalid = || {
        Error::InvalidFilter(format!(
            "'{}' expects a {} value, got {}",
            name,
            kind.as_str(),
            value
        ))
    };
    match kind {
        AttributeKind::Number => strict_number(value)
            .map(AttributeValue::Number)
            .ok_or_else(invalid),
        AttributeKind::Timestamp => match value {
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .map(AttributeValue::Timestamp)
                .ok_or_else(invalid),
            Value::String(s) => parse_timestamp_str(s)
                .map(AttributeValue::Timestamp)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
        AttributeKind::Text | AttributeKind::Category => match value {
            Value::String(s) => Ok(AttributeValue::Text(s.trim().to_string())),
            _ => Err(invalid()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("under 100"), Some(100.0));
        assert_eq!(first_number("less than $1,250.50 per night"), Some(1250.5));
        assert_eq!(first_number("rated 4.5 or more"), Some(4.5));
        assert_eq!(first_number("at most 200."), Some(200.0));
        assert_eq!(first_number("cheap"), None);
    }

    #[test]
    fn test_loose_vs_strict() {
        assert_eq!(loose_number(&json!("under 100")), Some(100.0));
        assert_eq!(strict_number(&json!("under 100")), None);
        assert_eq!(strict_number(&json!(" 42 ")), Some(42.0));
    }

    #[test]
    fn test_weight_and_limit() {
        assert_eq!(weight("w", &json!(0.5)).unwrap(), 0.5);
        assert!(matches!(weight("w", &json!("heavy")), Err(Error::InvalidParameter(_))));
        assert!(matches!(weight("w", &json!(-0.5)), Err(Error::InvalidParameter(_))));
        assert_eq!(weight("w", &json!(0)).unwrap(), 0.0);
        assert_eq!(limit(&json!(3)).unwrap(), 3);
        assert!(limit(&json!(0)).is_err());
        assert!(limit(&json!(-2)).is_err());
    }

    #[test]
    fn test_threshold_types() {
        assert_eq!(
            threshold("p", AttributeKind::Number, &json!("150")).unwrap(),
            AttributeValue::Number(150.0)
        );
        assert!(matches!(
            threshold("p", AttributeKind::Number, &json!("cheap")),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            threshold("t", AttributeKind::Timestamp, &json!("2024-01-01")),
            Ok(AttributeValue::Timestamp(_))
        ));
        assert!(threshold("r", AttributeKind::Category, &json!(3)).is_err());
    }

    #[test]
    fn test_absent() {
        assert!(is_absent(&Value::Null));
        assert!(is_absent(&json!("  ")));
        assert!(!is_absent(&json!(0)));
    }
}
