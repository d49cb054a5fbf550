pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::ScoringError,
    model::{AnalysisId, Classification, EntityId, FraudAnalysis, FraudRule, RuleCategory, RuleVersion},
};

pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait RuleStorage: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<FraudRule>, ScoringError>;

    /// Active rules, optionally restricted to one category. Order unspecified.
    async fn get_active_rules(&self, category: Option<RuleCategory>) -> Result<Vec<FraudRule>, ScoringError>;

    async fn get_rule(&self, rule_id: &str) -> Result<Option<FraudRule>, ScoringError>;

    /// Fails with `InvalidInput` when the id is taken.
    async fn create_rule(&self, rule: &FraudRule) -> Result<(), ScoringError>;

    /// Snapshots the stored configuration, then replaces it with `rule`.
    /// The new version is the stored one plus one; statistics are kept.
    async fn update_rule(
        &self,
        rule: &FraudRule,
        editor: &str,
        at: DateTime<Utc>,
    ) -> Result<FraudRule, ScoringError>;

    /// Prior configurations, oldest first.
    async fn rule_versions(&self, rule_id: &str) -> Result<Vec<RuleVersion>, ScoringError>;

    async fn record_triggers(&self, rule_ids: &[EntityId], at: DateTime<Utc>) -> Result<(), ScoringError>;

    /// Counts a true or false positive on each rule. Negative labels are ignored.
    async fn record_feedback(
        &self,
        rule_ids: &[EntityId],
        classification: Classification,
    ) -> Result<(), ScoringError>;
}

#[async_trait]
pub trait AnalysisStorage: Send + Sync {
    async fn save_analysis(&self, analysis: &FraudAnalysis) -> Result<(), ScoringError>;

    async fn get_analysis(&self, analysis_id: AnalysisId) -> Result<Option<FraudAnalysis>, ScoringError>;

    /// Replaces the stored analysis only if it is still at `expected_revision`,
    /// otherwise fails with `Conflict`.
    async fn update_analysis(&self, analysis: &FraudAnalysis, expected_revision: u32) -> Result<(), ScoringError>;

    /// Pending analyses that require review, highest score first.
    async fn pending_reviews(&self, limit: usize) -> Result<Vec<FraudAnalysis>, ScoringError>;
}

/// Ordering used for the review queue.
pub(crate) fn review_queue_order(a: &FraudAnalysis, b: &FraudAnalysis) -> std::cmp::Ordering {
    b.fraud_score()
        .total_cmp(&a.fraud_score())
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.id().cmp(&b.id()))
}
