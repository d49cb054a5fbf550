use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{condition::evaluate_condition, guards::RuleRateLimiter, guards::schedule_allows};
use crate::{
    error::RuleFault,
    model::{
        AnalysisContext, Condition, EntityId, FraudRule, LogicalOperator, RuleCategory, RuleTrigger,
        Severity, clamp01,
    },
};

/// Result of evaluating one rule against one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub rule_id: EntityId,
    pub rule_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub priority: i32,
    pub triggered: bool,
    pub contribution: f64,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    OutsideSchedule,
    RateLimited,
    InvalidSchedule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleOutcome {
    /// Ordered by descending priority, then rule id
    pub evaluations: Vec<RuleEvaluation>,
    pub skipped: Vec<(EntityId, SkipReason)>,
    pub rule_score: f64,
    /// Rate-limit slots claimed by rules that fired
    #[serde(skip)]
    pub reserved: Vec<EntityId>,
}

impl RuleOutcome {
    pub fn triggers(&self) -> Vec<RuleTrigger> {
        self.evaluations
            .iter()
            .filter(|e| e.triggered)
            .map(|e| RuleTrigger {
                rule_id: e.rule_id.clone(),
                rule_name: e.rule_name.clone(),
                category: e.category,
                severity: e.severity,
                priority: e.priority,
                contribution: e.contribution,
                reason: e.reason.clone().unwrap_or_default(),
            })
            .collect()
    }

    pub fn triggered_rule_ids(&self) -> Vec<EntityId> {
        self.evaluations
            .iter()
            .filter(|e| e.triggered)
            .map(|e| e.rule_id.clone())
            .collect()
    }

    pub fn fault_count(&self) -> usize {
        self.evaluations.iter().filter(|e| e.fault.is_some()).count()
    }
}

/// Declarative rule evaluation.
///
/// A rate-limited rule that fires claims its slot inside `evaluate`, so
/// concurrent analyses cannot overrun the limit. Callers that end up not
/// storing the analysis hand the slots back with
/// [`RuleEngine::release_reservations`].
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rate_limiter: Arc<RuleRateLimiter>,
}

impl RuleEngine {
    pub fn new(rate_limiter: Arc<RuleRateLimiter>) -> Self {
        Self { rate_limiter }
    }

    pub fn evaluate(&self, context: &AnalysisContext, rules: &[FraudRule], now: DateTime<Utc>) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();

        for rule in rules {
            if let Some(reason) = self.skip_reason(rule, now) {
                debug!(rule_id = %rule.id, ?reason, "Rule skipped");
                outcome.skipped.push((rule.id.clone(), reason));
                continue;
            }
            let evaluation = Self::evaluate_rule(rule, context);
            if evaluation.triggered && rule.rate_limit.is_some() {
                if !self.rate_limiter.try_reserve(rule, now) {
                    debug!(rule_id = %rule.id, "Rule fired but its rate limit is spent");
                    outcome.skipped.push((rule.id.clone(), SkipReason::RateLimited));
                    continue;
                }
                outcome.reserved.push(rule.id.clone());
            }
            outcome.evaluations.push(evaluation);
        }

        outcome
            .evaluations
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.rule_id.cmp(&b.rule_id)));
        outcome.rule_score = clamp01(outcome.evaluations.iter().map(|e| e.contribution).sum());
        outcome
    }

    fn skip_reason(&self, rule: &FraudRule, now: DateTime<Utc>) -> Option<SkipReason> {
        if !rule.active {
            return Some(SkipReason::Inactive);
        }
        if let Some(schedule) = &rule.schedule {
            match schedule_allows(schedule, now) {
                Ok(true) => {}
                Ok(false) => return Some(SkipReason::OutsideSchedule),
                Err(fault) => {
                    report_fault(rule, &fault);
                    return Some(SkipReason::InvalidSchedule);
                }
            }
        }
        if self.rate_limiter.is_limited(rule, now) {
            return Some(SkipReason::RateLimited);
        }
        None
    }

    /// Evaluates a single rule. Pure: depends on nothing but its arguments.
    pub fn evaluate_rule(rule: &FraudRule, context: &AnalysisContext) -> RuleEvaluation {
        let mut evaluation = RuleEvaluation {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            category: rule.category,
            severity: rule.severity,
            priority: rule.priority,
            triggered: false,
            contribution: 0.0,
            reason: None,
            fault: None,
        };

        // a fault in any condition disables the rule, even under OR
        let results: Result<Vec<(&Condition, bool)>, RuleFault> = rule
            .conditions
            .iter()
            .map(|c| evaluate_condition(c, context).map(|matched| (c, matched)))
            .collect();

        let results = match results {
            Ok(results) => results,
            Err(fault) => {
                report_fault(rule, &fault);
                evaluation.fault = Some(fault.to_string());
                return evaluation;
            }
        };

        let triggered = !results.is_empty()
            && match rule.logical_operator {
                LogicalOperator::And => results.iter().all(|(_, matched)| *matched),
                LogicalOperator::Or => results.iter().any(|(_, matched)| *matched),
            };

        if triggered {
            evaluation.triggered = true;
            evaluation.contribution = clamp01(rule.score_impact);
            evaluation.reason = Some(match &rule.description {
                Some(description) if !description.trim().is_empty() => description.clone(),
                _ => results
                    .iter()
                    .filter(|(_, matched)| *matched)
                    .map(|(c, _)| describe(c, context))
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }
        evaluation
    }

    /// Returns the slots claimed by `outcome`, which was evaluated at `at`.
    pub fn release_reservations(&self, outcome: &RuleOutcome, at: DateTime<Utc>) {
        for rule_id in &outcome.reserved {
            self.rate_limiter.release(rule_id, at);
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(Arc::new(RuleRateLimiter::default()))
    }
}

fn describe(condition: &Condition, context: &AnalysisContext) -> String {
    let actual = context
        .resolve(&condition.field)
        .map(|v| v.to_string())
        .unwrap_or_else(|| "undefined".to_string());
    if condition.value.is_null() {
        format!("{} {} (actual {})", condition.field, condition.operator, actual)
    } else {
        format!("{} {} {} (actual {})", condition.field, condition.operator, condition.value, actual)
    }
}

fn report_fault(rule: &FraudRule, fault: &RuleFault) {
    warn!(rule_id = %rule.id, rule_name = %rule.name, error = %fault, "Rule misconfigured; treated as not triggered");
    counter!("fraud_rule_faults_total", "rule" => rule.id.clone()).increment(1);
}
