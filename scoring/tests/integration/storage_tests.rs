//! Postgres-backed storage. Needs a database at `DATABASE_URL`:
//! `cargo test -- --ignored`.

use chrono::{Duration, Utc};
use common::{generate_unique_id, get_test_database_url};
use serial_test::serial;
use std::error::Error;

use scoring::{
    context_builder::ExpenseStore,
    error::ScoringError,
    model::*,
    storage::{AnalysisStorage, PgStore, RuleStorage},
};

use super::test_utils::{expense, large_amount_rule};

type TestResult = Result<(), Box<dyn Error + Send + Sync>>;

async fn store() -> Result<PgStore, Box<dyn Error + Send + Sync>> {
    let store = PgStore::new(&get_test_database_url()).await?;
    store.ensure_schema().await?;
    Ok(store)
}

fn draft(payer: &str, score: f64) -> AnalysisDraft {
    AnalysisDraft {
        expense_id: None,
        payer_id: payer.to_string(),
        group_id: None,
        fraud_score: score,
        confidence: 0.5,
        explanation: "stored".to_string(),
        components: vec![AnalysisComponent::Rule, AnalysisComponent::Fallback],
        rule_triggers: vec![],
        ml_output: None,
        ml_failure: None,
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_rule_versions_and_statistics() -> TestResult {
    let store = store().await?;
    let id = generate_unique_id("RULE");
    store.create_rule(&large_amount_rule(&id, 1000.0, 0.4)).await?;
    assert!(matches!(
        store.create_rule(&large_amount_rule(&id, 1000.0, 0.4)).await,
        Err(ScoringError::InvalidInput(_))
    ));

    store.record_triggers(&[id.clone()], Utc::now()).await?;
    store.record_feedback(&[id.clone()], Classification::TruePositive).await?;

    let mut edited = large_amount_rule(&id, 2000.0, 0.6);
    edited.statistics = RuleStatistics::default();
    let updated = store.update_rule(&edited, "editor", Utc::now()).await?;
    assert_eq!(updated.version, 2);
    assert_eq!(updated.statistics.trigger_count, 1);
    assert_eq!(updated.statistics.true_positives, 1);

    let stored = store.get_rule(&id).await?.ok_or("rule missing")?;
    assert_eq!(stored.score_impact, 0.6);
    assert_eq!(stored.statistics.trigger_count, 1);

    let versions = store.rule_versions(&id).await?;
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].snapshot.score_impact, 0.4);
    assert_eq!(versions[0].replaced_by.as_deref(), Some("editor"));
    Ok(())
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_analysis_revision_guard() -> TestResult {
    let store = store().await?;
    let payer = generate_unique_id("PAYER");
    let analysis = FraudAnalysis::new(draft(&payer, 0.75), &ScoreThresholds::default(), Utc::now());
    store.save_analysis(&analysis).await?;

    let mut reviewed = analysis.clone();
    reviewed.review("alice", "checked", Utc::now())?;
    store.update_analysis(&reviewed, 0).await?;

    let mut stale = analysis.clone();
    stale.dismiss("bob", "late", Utc::now())?;
    assert!(matches!(
        store.update_analysis(&stale, 0).await,
        Err(ScoringError::Conflict(_))
    ));

    let loaded = store.get_analysis(analysis.id()).await?.ok_or("analysis missing")?;
    assert_eq!(loaded.review_status(), ReviewStatus::Reviewed);
    assert_eq!(loaded.revision(), 1);
    Ok(())
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_expense_history_window() -> TestResult {
    let store = store().await?;
    let payer = generate_unique_id("PAYER");
    let now = Utc::now();
    store
        .insert_expense(&expense(&generate_unique_id("EXP"), &payer, 40.0, now - Duration::days(2)))
        .await?;
    store
        .insert_expense(&expense(&generate_unique_id("EXP"), &payer, 55.0, now - Duration::days(40)))
        .await?;
    let current_id = generate_unique_id("EXP");
    store.insert_expense(&expense(&current_id, &payer, 900.0, now)).await?;

    let loaded = store.get_expense(&current_id).await?.ok_or("expense missing")?;
    assert_eq!(loaded.payer_id.as_deref(), Some(payer.as_str()));

    let history = store.user_history(&payer, now - Duration::days(30)).await?;
    assert_eq!(history.len(), 2);
    Ok(())
}
