use jsonschema::validate;
use regex::RegexBuilder;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    error::ScoringError,
    model::{FraudRule, Operator},
};

/// JSON schema every rule definition must satisfy before it is stored.
pub fn rule_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "FraudRule",
        "type": "object",
        "required": ["id", "name", "category", "severity", "score_impact", "conditions"],
        "properties": {
            "id": { "type": "string", "minLength": 1, "pattern": "\\S" },
            "name": { "type": "string", "minLength": 1, "pattern": "\\S" },
            "description": { "type": ["string", "null"] },
            "category": {
                "enum": ["amount", "frequency", "timing", "behavior", "pattern", "duplicate", "threshold", "custom"]
            },
            "active": { "type": "boolean" },
            "severity": { "enum": ["low", "medium", "high", "critical"] },
            "priority": { "type": "integer" },
            "score_impact": { "type": "number", "minimum": 0, "maximum": 1 },
            "logical_operator": { "enum": ["AND", "OR"] },
            "conditions": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["field", "operator"],
                    "properties": {
                        "field": { "type": "string", "minLength": 1 },
                        "operator": {
                            "enum": [
                                "equals", "not_equals", "greater_than", "greater_than_or_equal",
                                "less_than", "less_than_or_equal", "contains", "not_contains",
                                "starts_with", "ends_with", "in", "not_in", "regex",
                                "exists", "not_exists", "between", "not_between"
                            ]
                        },
                        "value_type": { "enum": ["string", "number", "boolean", "array", "date"] }
                    }
                }
            },
            "actions": {
                "type": "array",
                "items": {
                    "enum": ["create_alert", "block", "require_approval", "notify", "log", "escalate"]
                }
            },
            "rate_limit": {
                "type": ["object", "null"],
                "required": ["max_triggers"],
                "properties": {
                    "max_triggers": { "type": "integer", "minimum": 1 },
                    "window_secs": { "type": ["integer", "null"], "minimum": 1 }
                }
            },
            "schedule": {
                "type": ["object", "null"],
                "properties": {
                    "days_of_week": {
                        "type": "array",
                        "items": { "type": "integer", "minimum": 0, "maximum": 6 }
                    },
                    "start_time": { "type": ["string", "null"], "pattern": "^([01][0-9]|2[0-3]):[0-5][0-9]$" },
                    "end_time": { "type": ["string", "null"], "pattern": "^([01][0-9]|2[0-3]):[0-5][0-9]$" },
                    "timezone": { "type": "string" }
                }
            }
        }
    })
}

/// Rejects rule definitions that would only ever fault at evaluation time.
pub fn validate_rule(rule: &FraudRule) -> Result<(), ScoringError> {
    let document = serde_json::to_value(rule).map_err(|e| ScoringError::InvalidRule(e.to_string()))?;
    if let Err(error) = validate(&rule_schema(), &document) {
        debug!(rule_id = %rule.id, "Rule schema validation failed: {:?}", error);
        return Err(ScoringError::InvalidRule(error.to_string()));
    }

    for condition in &rule.conditions {
        let invalid = |detail: &str| {
            ScoringError::InvalidRule(format!("condition on '{}': {}", condition.field, detail))
        };
        match condition.operator {
            Operator::Between | Operator::NotBetween => {
                super::condition::bounds(condition)
                    .map_err(|fault| ScoringError::InvalidRule(fault.to_string()))?;
            }
            Operator::In | Operator::NotIn if !condition.value.is_array() => {
                return Err(invalid("expects an array value"));
            }
            Operator::Regex => {
                let pattern = condition.value.as_str().ok_or_else(|| invalid("regex pattern must be a string"))?;
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| invalid(&format!("invalid regex: {}", e)))?;
            }
            _ => {}
        }
    }

    if let Some(schedule) = &rule.schedule {
        super::guards::schedule_allows(schedule, chrono::Utc::now())
            .map_err(|fault| ScoringError::InvalidRule(fault.to_string()))?;
    }
    Ok(())
}
