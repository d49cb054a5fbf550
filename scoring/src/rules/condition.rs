use chrono::DateTime;
use regex::RegexBuilder;
use serde_json::Value;

use crate::{
    error::RuleFault,
    model::{AnalysisContext, Condition, Operator, ValueType},
};

/// Evaluates one condition against the context.
///
/// `Ok(false)` covers every data-dependent miss (undefined field, value that
/// cannot be coerced). `Err` is reserved for misconfiguration that makes the
/// whole rule untrustworthy.
pub fn evaluate_condition(condition: &Condition, context: &AnalysisContext) -> Result<bool, RuleFault> {
    let actual = context.resolve(&condition.field);
    let expected = &condition.value;

    match condition.operator {
        Operator::Exists => Ok(actual.is_some()),
        Operator::NotExists => Ok(actual.is_none()),
        Operator::Unsupported => Err(RuleFault::UnsupportedOperator(condition.field.clone())),

        Operator::Between | Operator::NotBetween => {
            let (low, high) = bounds(condition)?;
            let Some(value) = actual.and_then(|v| coerce_number(v, condition.value_type)) else {
                return Ok(false);
            };
            let inside = low <= value && value <= high;
            Ok(if condition.operator == Operator::Between { inside } else { !inside })
        }

        Operator::In | Operator::NotIn => {
            let Value::Array(candidates) = expected else {
                return Err(RuleFault::ExpectedArray {
                    field: condition.field.clone(),
                });
            };
            let Some(actual) = actual else {
                return Ok(false);
            };
            let member = candidates.iter().any(|c| loose_equals(actual, c, condition.value_type));
            Ok(if condition.operator == Operator::In { member } else { !member })
        }

        Operator::Regex => {
            let pattern = expected.as_str().ok_or_else(|| RuleFault::InvalidRegex {
                pattern: expected.to_string(),
                detail: "pattern must be a string".to_string(),
            })?;
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| RuleFault::InvalidRegex {
                    pattern: pattern.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(actual
                .and_then(as_text)
                .map(|text| regex.is_match(&text))
                .unwrap_or(false))
        }

        operator => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            Ok(match operator {
                Operator::Equals => loose_equals(actual, expected, condition.value_type),
                Operator::NotEquals => !loose_equals(actual, expected, condition.value_type),
                Operator::GreaterThan => compare(actual, expected, condition.value_type, |a, b| a > b),
                Operator::GreaterThanOrEqual => compare(actual, expected, condition.value_type, |a, b| a >= b),
                Operator::LessThan => compare(actual, expected, condition.value_type, |a, b| a < b),
                Operator::LessThanOrEqual => compare(actual, expected, condition.value_type, |a, b| a <= b),
                Operator::Contains => contains(actual, expected, condition.value_type),
                Operator::NotContains => !contains(actual, expected, condition.value_type),
                Operator::StartsWith => text_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(&e)),
                Operator::EndsWith => text_pair(actual, expected).is_some_and(|(a, e)| a.ends_with(&e)),
                // handled above
                Operator::Exists
                | Operator::NotExists
                | Operator::Unsupported
                | Operator::Between
                | Operator::NotBetween
                | Operator::In
                | Operator::NotIn
                | Operator::Regex => false,
            })
        }
    }
}

pub(crate) fn bounds(condition: &Condition) -> Result<(f64, f64), RuleFault> {
    let malformed = |detail: &str| RuleFault::MalformedBounds {
        field: condition.field.clone(),
        detail: detail.to_string(),
    };
    let Value::Array(items) = &condition.value else {
        return Err(malformed("expected a two-element array"));
    };
    if items.len() != 2 {
        return Err(malformed("expected exactly two bounds"));
    }
    let low = coerce_number(&items[0], condition.value_type).ok_or_else(|| malformed("lower bound is not numeric"))?;
    let high = coerce_number(&items[1], condition.value_type).ok_or_else(|| malformed("upper bound is not numeric"))?;
    Ok((low.min(high), low.max(high)))
}

/// Numbers, numeric strings and (for date conditions) RFC 3339 timestamps.
fn coerce_number(value: &Value, value_type: ValueType) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if value_type == ValueType::Date => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|d| d.timestamp_millis() as f64),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Lower-cased textual form of scalars.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_pair(actual: &Value, expected: &Value) -> Option<(String, String)> {
    Some((as_text(actual)?, as_text(expected)?))
}

fn compare(actual: &Value, expected: &Value, value_type: ValueType, op: fn(f64, f64) -> bool) -> bool {
    match (coerce_number(actual, value_type), coerce_number(expected, value_type)) {
        (Some(a), Some(e)) => op(a, e),
        _ => false,
    }
}

fn loose_equals(actual: &Value, expected: &Value, value_type: ValueType) -> bool {
    match (actual, expected) {
        (Value::Bool(a), Value::Bool(e)) => a == e,
        (Value::Bool(a), Value::String(e)) | (Value::String(e), Value::Bool(a)) => {
            e.trim().eq_ignore_ascii_case(if *a { "true" } else { "false" })
        }
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            compare(actual, expected, value_type, |a, e| (a - e).abs() < f64::EPSILON)
        }
        _ if value_type == ValueType::Date => {
            compare(actual, expected, value_type, |a, e| a == e)
        }
        _ => text_pair(actual, expected).is_some_and(|(a, e)| a == e),
    }
}

fn contains(actual: &Value, expected: &Value, value_type: ValueType) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loose_equals(item, expected, value_type)),
        _ => text_pair(actual, expected).is_some_and(|(a, e)| a.contains(&e)),
    }
}
