use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{AnalysisStorage, RuleStorage, review_queue_order};
use crate::{
    context_builder::ExpenseStore,
    error::ScoringError,
    model::{
        AnalysisId, Classification, EntityId, ExpenseRecord, FraudAnalysis, FraudRule, ReviewStatus, RuleCategory,
        RuleVersion,
    },
};

/// Process-local store for rules, analyses and expenses.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rules: RwLock<BTreeMap<EntityId, FraudRule>>,
    versions: RwLock<HashMap<EntityId, Vec<RuleVersion>>>,
    analyses: RwLock<HashMap<AnalysisId, FraudAnalysis>>,
    expenses: RwLock<Vec<ExpenseRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_rules(rules: Vec<FraudRule>) -> Self {
        let store = Self::new();
        {
            let mut map = store.rules.write().await;
            for rule in rules {
                map.insert(rule.id.clone(), rule);
            }
        }
        store
    }

    pub async fn add_expense(&self, expense: ExpenseRecord) {
        self.expenses.write().await.push(expense);
    }

    pub async fn analysis_count(&self) -> usize {
        self.analyses.read().await.len()
    }
}

#[async_trait]
impl RuleStorage for InMemoryStore {
    async fn list_rules(&self) -> Result<Vec<FraudRule>, ScoringError> {
        Ok(self.rules.read().await.values().cloned().collect())
    }

    async fn get_active_rules(&self, category: Option<RuleCategory>) -> Result<Vec<FraudRule>, ScoringError> {
        Ok(self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.active && category.is_none_or(|c| r.category == c))
            .cloned()
            .collect())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<FraudRule>, ScoringError> {
        Ok(self.rules.read().await.get(rule_id).cloned())
    }

    async fn create_rule(&self, rule: &FraudRule) -> Result<(), ScoringError> {
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(ScoringError::InvalidInput(format!("rule {} already exists", rule.id)));
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn update_rule(
        &self,
        rule: &FraudRule,
        editor: &str,
        at: DateTime<Utc>,
    ) -> Result<FraudRule, ScoringError> {
        let mut rules = self.rules.write().await;
        let current = rules
            .get(&rule.id)
            .cloned()
            .ok_or_else(|| ScoringError::not_found("rule", &rule.id))?;

        let mut updated = rule.clone();
        updated.version = current.version + 1;
        updated.statistics = current.statistics.clone();
        updated.updated_by = Some(editor.to_string());
        updated.updated_at = Some(at);

        self.versions
            .write()
            .await
            .entry(rule.id.clone())
            .or_default()
            .push(RuleVersion {
                rule_id: rule.id.clone(),
                version: current.version,
                snapshot: current,
                replaced_at: at,
                replaced_by: Some(editor.to_string()),
            });
        rules.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn rule_versions(&self, rule_id: &str) -> Result<Vec<RuleVersion>, ScoringError> {
        Ok(self.versions.read().await.get(rule_id).cloned().unwrap_or_default())
    }

    async fn record_triggers(&self, rule_ids: &[EntityId], at: DateTime<Utc>) -> Result<(), ScoringError> {
        let mut rules = self.rules.write().await;
        for rule_id in rule_ids {
            if let Some(rule) = rules.get_mut(rule_id) {
                rule.statistics.trigger_count += 1;
                rule.statistics.last_triggered_at = Some(at);
            }
        }
        Ok(())
    }

    async fn record_feedback(
        &self,
        rule_ids: &[EntityId],
        classification: Classification,
    ) -> Result<(), ScoringError> {
        let mut rules = self.rules.write().await;
        for rule_id in rule_ids {
            if let Some(rule) = rules.get_mut(rule_id) {
                match classification {
                    Classification::TruePositive => rule.statistics.true_positives += 1,
                    Classification::FalsePositive => rule.statistics.false_positives += 1,
                    Classification::TrueNegative | Classification::FalseNegative => {}
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisStorage for InMemoryStore {
    async fn save_analysis(&self, analysis: &FraudAnalysis) -> Result<(), ScoringError> {
        self.analyses.write().await.insert(analysis.id(), analysis.clone());
        Ok(())
    }

    async fn get_analysis(&self, analysis_id: AnalysisId) -> Result<Option<FraudAnalysis>, ScoringError> {
        Ok(self.analyses.read().await.get(&analysis_id).cloned())
    }

    async fn update_analysis(&self, analysis: &FraudAnalysis, expected_revision: u32) -> Result<(), ScoringError> {
        let mut analyses = self.analyses.write().await;
        let stored = analyses
            .get_mut(&analysis.id())
            .ok_or_else(|| ScoringError::not_found("analysis", analysis.id().to_string()))?;
        if stored.revision() != expected_revision {
            return Err(ScoringError::Conflict(analysis.id()));
        }
        *stored = analysis.clone();
        Ok(())
    }

    async fn pending_reviews(&self, limit: usize) -> Result<Vec<FraudAnalysis>, ScoringError> {
        let mut pending: Vec<FraudAnalysis> = self
            .analyses
            .read()
            .await
            .values()
            .filter(|a| a.requires_review() && a.review_status() == ReviewStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(review_queue_order);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl ExpenseStore for InMemoryStore {
    async fn get_expense(&self, expense_id: &str) -> Result<Option<ExpenseRecord>, ScoringError> {
        Ok(self
            .expenses
            .read()
            .await
            .iter()
            .find(|e| e.id.as_deref() == Some(expense_id))
            .cloned())
    }

    async fn user_history(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError> {
        Ok(self
            .expenses
            .read()
            .await
            .iter()
            .filter(|e| e.payer_id.as_deref() == Some(user_id) && e.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn group_history(&self, group_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError> {
        Ok(self
            .expenses
            .read()
            .await
            .iter()
            .filter(|e| e.group_id.as_deref() == Some(group_id) && e.timestamp >= since)
            .cloned()
            .collect())
    }
}
