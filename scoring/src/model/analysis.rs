use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display as EnumDisplay, EnumString};
use uuid::Uuid;

use super::{AnalysisId, EntityId, RuleCategory, Severity, clamp01};
use crate::error::ScoringError;
use common::config::ThresholdConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnalysisComponent {
    Rule,
    Ml,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ReviewStatus {
    Pending,
    Reviewed,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

/// Score cut-offs for flags and risk levels.
///
/// Ordering `auto_flag >= alert >= review >= medium` is enforced so the
/// derived flags stay nested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreThresholds {
    pub auto_flag: f64,
    pub alert: f64,
    pub review: f64,
    pub medium: f64,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            auto_flag: 0.9,
            alert: 0.8,
            review: 0.6,
            medium: 0.3,
        }
    }
}

impl ScoreThresholds {
    pub fn new(auto_flag: f64, alert: f64, review: f64, medium: f64) -> Result<Self, ScoringError> {
        let thresholds = Self {
            auto_flag,
            alert,
            review,
            medium,
        };
        for (name, value) in [
            ("auto_flag", auto_flag),
            ("alert", alert),
            ("review", review),
            ("medium", medium),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScoringError::InvalidConfig(format!(
                    "threshold {} = {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        if !(auto_flag >= alert && alert >= review && review >= medium) {
            return Err(ScoringError::InvalidConfig(format!(
                "thresholds must satisfy auto_flag >= alert >= review >= medium, got {} / {} / {} / {}",
                auto_flag, alert, review, medium
            )));
        }
        Ok(thresholds)
    }

    pub fn from_config(config: &ThresholdConfig) -> Result<Self, ScoringError> {
        Self::new(config.auto_flag, config.alert, config.review, config.medium)
    }

    pub fn risk_level(&self, score: f64) -> RiskLevel {
        if score >= self.review {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// A rule that fired for an analysis, with what it added to the rule score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTrigger {
    pub rule_id: EntityId,
    pub rule_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub priority: i32,
    pub contribution: f64,
    pub reason: String,
}

/// Raw output of the ML service as recorded on the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlOutput {
    pub score: f64,
    pub confidence: f64,
    pub model_version: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub feature_attributions: BTreeMap<String, f64>,
    #[serde(default)]
    pub cached: bool,
}

/// Combiner output before it becomes a [`FraudAnalysis`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDraft {
    pub expense_id: Option<EntityId>,
    pub payer_id: EntityId,
    pub group_id: Option<EntityId>,
    pub fraud_score: f64,
    pub confidence: f64,
    pub explanation: String,
    pub components: Vec<AnalysisComponent>,
    pub rule_triggers: Vec<RuleTrigger>,
    pub ml_output: Option<MlOutput>,
    pub ml_failure: Option<String>,
}

/// Persisted result of one analysis.
///
/// Scores are clamped and flags derived in [`FraudAnalysis::new`]; after
/// that only the review and classification fields change, through
/// [`review`](Self::review), [`dismiss`](Self::dismiss) and
/// [`classify`](Self::classify).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAnalysis {
    id: AnalysisId,
    expense_id: Option<EntityId>,
    payer_id: EntityId,
    group_id: Option<EntityId>,
    fraud_score: f64,
    confidence: f64,
    risk_level: RiskLevel,
    explanation: String,
    analysis_components: Vec<AnalysisComponent>,
    rule_triggers: Vec<RuleTrigger>,
    ml_output: Option<MlOutput>,
    ml_failure: Option<String>,
    requires_review: bool,
    requires_alert: bool,
    auto_flag: bool,
    review_status: ReviewStatus,
    reviewed_by: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    classification: Option<Classification>,
    classified_by: Option<String>,
    classified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    revision: u32,
}

impl FraudAnalysis {
    pub fn new(draft: AnalysisDraft, thresholds: &ScoreThresholds, created_at: DateTime<Utc>) -> Self {
        let fraud_score = clamp01(draft.fraud_score);
        let confidence = clamp01(draft.confidence);

        Self {
            id: Uuid::new_v4(),
            expense_id: draft.expense_id,
            payer_id: draft.payer_id,
            group_id: draft.group_id,
            fraud_score,
            confidence,
            risk_level: thresholds.risk_level(fraud_score),
            explanation: draft.explanation,
            analysis_components: draft.components,
            rule_triggers: draft.rule_triggers,
            ml_output: draft.ml_output,
            ml_failure: draft.ml_failure,
            requires_review: fraud_score >= thresholds.review,
            requires_alert: fraud_score >= thresholds.alert,
            auto_flag: fraud_score >= thresholds.auto_flag,
            review_status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            classification: None,
            classified_by: None,
            classified_at: None,
            created_at,
            revision: 0,
        }
    }

    pub fn id(&self) -> AnalysisId {
        self.id
    }

    pub fn expense_id(&self) -> Option<&str> {
        self.expense_id.as_deref()
    }

    pub fn payer_id(&self) -> &str {
        &self.payer_id
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn fraud_score(&self) -> f64 {
        self.fraud_score
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn analysis_components(&self) -> &[AnalysisComponent] {
        &self.analysis_components
    }

    pub fn is_fallback(&self) -> bool {
        self.analysis_components.contains(&AnalysisComponent::Fallback)
    }

    pub fn rule_triggers(&self) -> &[RuleTrigger] {
        &self.rule_triggers
    }

    pub fn ml_output(&self) -> Option<&MlOutput> {
        self.ml_output.as_ref()
    }

    pub fn ml_failure(&self) -> Option<&str> {
        self.ml_failure.as_deref()
    }

    pub fn requires_review(&self) -> bool {
        self.requires_review
    }

    pub fn requires_alert(&self) -> bool {
        self.requires_alert
    }

    pub fn auto_flag(&self) -> bool {
        self.auto_flag
    }

    pub fn review_status(&self) -> ReviewStatus {
        self.review_status
    }

    pub fn reviewed_by(&self) -> Option<&str> {
        self.reviewed_by.as_deref()
    }

    pub fn reviewed_at(&self) -> Option<DateTime<Utc>> {
        self.reviewed_at
    }

    pub fn review_notes(&self) -> Option<&str> {
        self.review_notes.as_deref()
    }

    pub fn classification(&self) -> Option<Classification> {
        self.classification
    }

    pub fn classified_by(&self) -> Option<&str> {
        self.classified_by.as_deref()
    }

    pub fn classified_at(&self) -> Option<DateTime<Utc>> {
        self.classified_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Bumped on every review/classification change; stores use it for
    /// optimistic concurrency.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn contributing_rule_ids(&self) -> Vec<EntityId> {
        self.rule_triggers.iter().map(|t| t.rule_id.clone()).collect()
    }

    /// PENDING -> REVIEWED
    pub fn review(&mut self, reviewer: &str, notes: &str, at: DateTime<Utc>) -> Result<(), ScoringError> {
        self.ensure_pending("REVIEWED")?;
        let reviewer = required("reviewer", reviewer)?;
        let notes = required("notes", notes)?;

        self.review_status = ReviewStatus::Reviewed;
        self.reviewed_by = Some(reviewer);
        self.reviewed_at = Some(at);
        self.review_notes = Some(notes);
        self.revision += 1;
        Ok(())
    }

    /// PENDING -> DISMISSED; the reason is kept as the review note.
    pub fn dismiss(&mut self, reviewer: &str, reason: &str, at: DateTime<Utc>) -> Result<(), ScoringError> {
        self.ensure_pending("DISMISSED")?;
        let reviewer = required("reviewer", reviewer)?;
        let reason = required("reason", reason)?;

        self.review_status = ReviewStatus::Dismissed;
        self.reviewed_by = Some(reviewer);
        self.reviewed_at = Some(at);
        self.review_notes = Some(reason);
        self.revision += 1;
        Ok(())
    }

    /// Sets the feedback label. Settable once, independent of review status.
    pub fn classify(
        &mut self,
        classifier: &str,
        classification: Classification,
        at: DateTime<Utc>,
    ) -> Result<(), ScoringError> {
        if let Some(current) = self.classification {
            return Err(ScoringError::InvalidTransition {
                analysis_id: self.id,
                current: format!("classified as {}", current),
                attempted: format!("classification {}", classification),
            });
        }
        let classifier = required("classifier", classifier)?;

        self.classification = Some(classification);
        self.classified_by = Some(classifier);
        self.classified_at = Some(at);
        self.revision += 1;
        Ok(())
    }

    fn ensure_pending(&self, attempted: &str) -> Result<(), ScoringError> {
        if self.review_status != ReviewStatus::Pending {
            return Err(ScoringError::InvalidTransition {
                analysis_id: self.id,
                current: self.review_status.to_string(),
                attempted: attempted.to_string(),
            });
        }
        Ok(())
    }
}

fn required(name: &str, value: &str) -> Result<String, ScoringError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ScoringError::InvalidInput(format!("{} is required", name)));
    }
    Ok(trimmed.to_string())
}
