use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use scoring::{
    context_builder::ContextBuilder,
    model::*,
    rules::{RuleEngine, RuleRateLimiter, SkipReason, validate_rule},
    storage::InMemoryStore,
};

use super::test_utils::{assert_close, expense};

fn rule_from_json(value: serde_json::Value) -> FraudRule {
    let rule: FraudRule = serde_json::from_value(value).unwrap();
    validate_rule(&rule).unwrap();
    rule
}

fn catalogue() -> Vec<FraudRule> {
    vec![
        rule_from_json(json!({
            "id": "duplicate-amount",
            "name": "Repeated amount",
            "category": "duplicate",
            "severity": "medium",
            "priority": 5,
            "score_impact": 0.25,
            "conditions": [
                { "field": "payer.history.same_amount_count", "operator": "greater_than_or_equal", "value": 1 }
            ]
        })),
        rule_from_json(json!({
            "id": "late-night",
            "name": "Late night expense",
            "category": "timing",
            "severity": "low",
            "score_impact": 0.1,
            "conditions": [
                { "field": "timing.is_late_night", "operator": "equals", "value": true }
            ]
        })),
        rule_from_json(json!({
            "id": "no-receipt-large",
            "name": "Large expense without receipt",
            "category": "behavior",
            "severity": "high",
            "priority": 8,
            "score_impact": 0.3,
            "logical_operator": "AND",
            "conditions": [
                { "field": "expense.amount", "operator": "greater_than", "value": 500 },
                { "field": "expense.has_receipt", "operator": "equals", "value": false }
            ]
        })),
        rule_from_json(json!({
            "id": "suspicious-merchant",
            "name": "Suspicious merchant",
            "category": "pattern",
            "severity": "high",
            "score_impact": 0.35,
            "conditions": [
                { "field": "expense.merchant", "operator": "regex", "value": "casino|crypto" }
            ]
        })),
    ]
}

async fn build_context(store: Arc<InMemoryStore>, record: ExpenseRecord) -> AnalysisContext {
    ContextBuilder::new(store, Duration::days(30))
        .build(&AnalysisRequest::inline(record))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_catalogue_against_built_context() {
    let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 0).unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.add_expense(expense("old-1", "payer-1", 750.0, at - Duration::days(2))).await;
    store.add_expense(expense("old-2", "payer-1", 20.0, at - Duration::days(1))).await;

    let mut record = expense("exp-1", "payer-1", 750.0, at);
    record.has_receipt = false;
    record.merchant = Some("Lucky CASINO Ltd".to_string());
    let context = build_context(store, record).await;
    assert_eq!(context.payer.history.count, 2);
    assert_eq!(context.payer.history.same_amount_count, 1);
    assert!(context.timing.is_late_night);

    let engine = RuleEngine::default();
    let outcome = engine.evaluate(&context, &catalogue(), Utc::now());

    let fired = outcome.triggered_rule_ids();
    assert_eq!(
        fired,
        vec!["no-receipt-large", "duplicate-amount", "late-night", "suspicious-merchant"]
    );
    assert_close(outcome.rule_score, 1.0);
    assert_eq!(outcome.fault_count(), 0);

    let triggers = outcome.triggers();
    let receipt = triggers.iter().find(|t| t.rule_id == "no-receipt-large").unwrap();
    assert!(receipt.reason.contains("expense.amount"));
}

#[tokio::test]
async fn test_quiet_expense_fires_nothing() {
    let at = Utc.with_ymd_and_hms(2024, 3, 12, 13, 0, 0).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let context = build_context(store, expense("exp-1", "payer-1", 42.5, at)).await;

    let outcome = RuleEngine::default().evaluate(&context, &catalogue(), Utc::now());
    assert!(outcome.triggered_rule_ids().is_empty());
    assert_close(outcome.rule_score, 0.0);
    assert_eq!(outcome.evaluations.len(), 4);
}

#[tokio::test]
async fn test_history_outside_window_is_ignored() {
    let at = Utc.with_ymd_and_hms(2024, 3, 12, 13, 0, 0).unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.add_expense(expense("ancient", "payer-1", 42.5, at - Duration::days(45))).await;
    let context = build_context(store, expense("exp-1", "payer-1", 42.5, at)).await;

    assert_eq!(context.payer.history.count, 0);
    assert!(context.derived.amount_to_payer_average.is_none());
    let outcome = RuleEngine::default().evaluate(&context, &catalogue(), Utc::now());
    assert!(!outcome.triggered_rule_ids().contains(&"duplicate-amount".to_string()));
}

#[tokio::test]
async fn test_schedule_and_rate_limit_skips_are_reported() {
    let at = Utc.with_ymd_and_hms(2024, 3, 12, 13, 0, 0).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let context = build_context(store, expense("exp-1", "payer-1", 900.0, at)).await;

    let office_hours = rule_from_json(json!({
        "id": "office-hours",
        "name": "Office hours only",
        "category": "timing",
        "severity": "low",
        "score_impact": 0.2,
        "conditions": [{ "field": "expense.amount", "operator": "greater_than", "value": 100 }],
        "schedule": { "days_of_week": [1, 2, 3, 4, 5], "start_time": "09:00", "end_time": "17:00", "timezone": "+01:00" }
    }));
    let limited = rule_from_json(json!({
        "id": "limited",
        "name": "Limited",
        "category": "amount",
        "severity": "low",
        "score_impact": 0.2,
        "conditions": [{ "field": "expense.amount", "operator": "greater_than", "value": 100 }],
        "rate_limit": { "max_triggers": 1 }
    }));
    let rules = vec![office_hours, limited];

    let engine = RuleEngine::new(Arc::new(RuleRateLimiter::new(Duration::hours(1))));
    // Saturday 03:00 UTC
    let weekend = Utc.with_ymd_and_hms(2024, 3, 16, 3, 0, 0).unwrap();
    let outcome = engine.evaluate(&context, &rules, weekend);
    assert_eq!(outcome.skipped, vec![("office-hours".to_string(), SkipReason::OutsideSchedule)]);
    assert_eq!(outcome.triggered_rule_ids(), vec!["limited"]);
    assert_eq!(outcome.reserved, vec!["limited"]);

    let later = engine.evaluate(&context, &rules, weekend + Duration::minutes(10));
    assert!(later.skipped.contains(&("limited".to_string(), SkipReason::RateLimited)));

    // Tuesday 10:30 at +01:00, well past the rate-limit window
    let weekday = Utc.with_ymd_and_hms(2024, 3, 19, 9, 30, 0).unwrap();
    let in_hours = engine.evaluate(&context, &rules, weekday);
    assert_eq!(in_hours.triggered_rule_ids(), vec!["limited", "office-hours"]);
}
