use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use scoring::{
    alerts::{AlertSink, LoggingAlertSink},
    analyzer::{AnalyzerDeps, AnalyzerSettings, FraudAnalyzer},
    combiner::ScoreCombiner,
    ml::{DisabledMlClient, MlClient},
    model::*,
    storage::InMemoryStore,
};

pub fn expense(id: &str, payer: &str, amount: f64, at: DateTime<Utc>) -> ExpenseRecord {
    ExpenseRecord {
        id: Some(id.to_string()),
        payer_id: Some(payer.to_string()),
        group_id: None,
        amount,
        currency: Some("EUR".to_string()),
        category: Some("food".to_string()),
        description: None,
        merchant: None,
        timestamp: at,
        has_receipt: true,
        participants: vec![],
    }
}

/// Context with empty histories, for tests that do not go through the builder.
pub fn context(expense_id: Option<&str>, payer: &str, amount: f64) -> AnalysisContext {
    let at = Utc::now();
    let mut record = expense(expense_id.unwrap_or("unused"), payer, amount, at);
    record.id = expense_id.map(str::to_string);
    AnalysisContext::new(
        ExpenseAttributes::from_record(&record, payer),
        PayerContext {
            id: payer.to_string(),
            history: HistoryStats::empty(),
        },
        GroupContext {
            id: None,
            history: HistoryStats::empty(),
        },
        TimingContext::at(at),
        DerivedSignals::default(),
    )
}

/// Fires when the amount is more than three times the payer's average.
pub fn unusual_amount_rule(impact: f64) -> FraudRule {
    FraudRule::new("unusual-amount", "Unusual amount", RuleCategory::Amount, Severity::High, impact)
        .with_priority(10)
        .with_condition(Condition::new(
            "derived.amount_to_payer_average",
            Operator::GreaterThan,
            json!(3.0),
        ))
}

pub fn large_amount_rule(id: &str, min: f64, impact: f64) -> FraudRule {
    FraudRule::new(id, format!("Amount over {}", min), RuleCategory::Amount, Severity::Medium, impact)
        .with_condition(Condition::new("expense.amount", Operator::GreaterThan, json!(min)))
}

/// Payer with three small expenses over the last days and one large one now.
pub async fn seed_payer_history(store: &InMemoryStore, payer: &str) -> ExpenseRecord {
    let now = Utc::now();
    for days in 1..=3 {
        store
            .add_expense(expense(&format!("{}-old-{}", payer, days), payer, 40.0, now - Duration::days(days)))
            .await;
    }
    let big = expense(&format!("{}-big", payer), payer, 5000.0, now);
    store.add_expense(big.clone()).await;
    big
}

pub struct TestAnalyzer {
    pub analyzer: FraudAnalyzer,
    pub store: Arc<InMemoryStore>,
}

pub fn build_analyzer(store: Arc<InMemoryStore>, ml: Arc<dyn MlClient>, alerts: Arc<dyn AlertSink>) -> FraudAnalyzer {
    let deps = AnalyzerDeps {
        expenses: store.clone(),
        rules: store.clone(),
        analyses: store,
        ml,
        alerts,
    };
    FraudAnalyzer::new(deps, ScoreCombiner::default(), AnalyzerSettings::default())
}

/// Rule-only analyzer over an in-memory store holding `rules`.
pub async fn rule_only_analyzer(rules: Vec<FraudRule>) -> TestAnalyzer {
    let store = Arc::new(InMemoryStore::with_rules(rules).await);
    let analyzer = build_analyzer(store.clone(), Arc::new(DisabledMlClient), Arc::new(LoggingAlertSink));
    TestAnalyzer { analyzer, store }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {} to be close to {}",
        actual,
        expected
    );
}
