use crate::{
    error::{MlError, ScoringError},
    model::{AnalysisComponent, AnalysisContext, AnalysisDraft, MlOutput, RuleTrigger, ScoreThresholds, clamp01},
    rules::RuleOutcome,
};
use common::config::ScoringConfig;

const EXPLAINED_RULES: usize = 3;

/// Weighted-sum policy merging the rule score with the ML score.
#[derive(Debug, Clone)]
pub struct ScoreCombiner {
    ml_weight: f64,
    rule_weight: f64,
    fallback_confidence: f64,
    thresholds: ScoreThresholds,
}

impl ScoreCombiner {
    pub fn new(
        ml_weight: f64,
        rule_weight: f64,
        fallback_confidence: f64,
        thresholds: ScoreThresholds,
    ) -> Result<Self, ScoringError> {
        if !(0.0..=1.0).contains(&ml_weight) || !(0.0..=1.0).contains(&rule_weight) {
            return Err(ScoringError::InvalidConfig(format!(
                "weights must be within [0, 1], got ml {} / rule {}",
                ml_weight, rule_weight
            )));
        }
        if ((ml_weight + rule_weight) - 1.0).abs() > 1e-9 {
            return Err(ScoringError::InvalidConfig(format!(
                "ml_weight + rule_weight must equal 1, got {}",
                ml_weight + rule_weight
            )));
        }
        if !(0.0..=1.0).contains(&fallback_confidence) {
            return Err(ScoringError::InvalidConfig(format!(
                "fallback_confidence {} is outside [0, 1]",
                fallback_confidence
            )));
        }
        Ok(Self {
            ml_weight,
            rule_weight,
            fallback_confidence,
            thresholds,
        })
    }

    pub fn from_config(config: &ScoringConfig) -> Result<Self, ScoringError> {
        Self::new(
            config.ml_weight,
            config.rule_weight,
            config.fallback_confidence,
            ScoreThresholds::from_config(&config.thresholds)?,
        )
    }

    pub fn thresholds(&self) -> &ScoreThresholds {
        &self.thresholds
    }

    pub fn combine(
        &self,
        context: &AnalysisContext,
        rules: &RuleOutcome,
        ml: Result<MlOutput, MlError>,
    ) -> AnalysisDraft {
        let rule_triggers = rules.triggers();
        let top_rules = explain_rules(&rule_triggers);

        let (fraud_score, confidence, components, ml_output, ml_failure, tail) = match ml {
            Ok(output) => {
                let score = clamp01(self.ml_weight * output.score + self.rule_weight * rules.rule_score);
                let tail = output
                    .explanation
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .map(|e| format!("ML: {}", e))
                    .unwrap_or_else(|| format!("ML score {:.2} (model {})", output.score, output.model_version));
                (
                    score,
                    output.confidence,
                    vec![AnalysisComponent::Rule, AnalysisComponent::Ml],
                    Some(output),
                    None,
                    tail,
                )
            }
            Err(error) => (
                rules.rule_score,
                self.fallback_confidence,
                vec![AnalysisComponent::Rule, AnalysisComponent::Fallback],
                None,
                Some(error.to_string()),
                format!("Rule-only fallback: {}", error),
            ),
        };

        let explanation = match top_rules {
            Some(rules) => format!("{}. {}", rules, tail),
            None if components.contains(&AnalysisComponent::Fallback) => {
                format!("No fraud indicators detected. {}", tail)
            }
            None => format!("No rule indicators detected. {}", tail),
        };

        AnalysisDraft {
            expense_id: context.expense_id().map(str::to_string),
            payer_id: context.payer_id().to_string(),
            group_id: context.group_id().map(str::to_string),
            fraud_score,
            confidence,
            explanation,
            components,
            rule_triggers,
            ml_output,
            ml_failure,
        }
    }
}

impl Default for ScoreCombiner {
    fn default() -> Self {
        Self {
            ml_weight: 0.7,
            rule_weight: 0.3,
            fallback_confidence: 0.5,
            thresholds: ScoreThresholds::default(),
        }
    }
}

/// Top triggered rules by contribution, ties broken by priority then id.
fn explain_rules(triggers: &[RuleTrigger]) -> Option<String> {
    if triggers.is_empty() {
        return None;
    }
    let mut ranked: Vec<&RuleTrigger> = triggers.iter().collect();
    ranked.sort_by(|a, b| {
        b.contribution
            .total_cmp(&a.contribution)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
    let listed = ranked
        .iter()
        .take(EXPLAINED_RULES)
        .map(|t| format!("{} (+{:.2})", t.rule_name, t.contribution))
        .collect::<Vec<_>>()
        .join(", ");
    let more = triggers.len().saturating_sub(EXPLAINED_RULES);
    Some(if more > 0 {
        format!("Triggered rules: {} and {} more", listed, more)
    } else {
        format!("Triggered rules: {}", listed)
    })
}
