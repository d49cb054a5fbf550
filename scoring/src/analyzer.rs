use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    alerts::{AlertSink, FraudAlert},
    combiner::ScoreCombiner,
    context_builder::{ContextBuilder, ExpenseStore},
    error::{MlError, ScoringError},
    ml::MlClient,
    model::{
        AnalysisId, AnalysisRequest, Classification, FraudAnalysis, FraudRule, RuleCategory, RuleStatistics,
        RuleVersion,
    },
    rules::{RuleEngine, RuleRateLimiter, validate_rule},
    storage::{AnalysisStorage, RuleStorage},
};
use common::config::Config;

const MAX_PENDING_PAGE: usize = 500;

/// Collaborators injected into the analyzer.
#[derive(Clone)]
pub struct AnalyzerDeps {
    pub expenses: Arc<dyn ExpenseStore>,
    pub rules: Arc<dyn RuleStorage>,
    pub analyses: Arc<dyn AnalysisStorage>,
    pub ml: Arc<dyn MlClient>,
    pub alerts: Arc<dyn AlertSink>,
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub batch_concurrency: usize,
    /// Deadline for the ML leg of one analysis
    pub analysis_timeout: Duration,
    pub history_window: chrono::Duration,
    /// Window for rule rate limits that do not declare one
    pub rule_rate_limit_window: chrono::Duration,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            batch_concurrency: 4,
            analysis_timeout: Duration::from_secs(5),
            history_window: chrono::Duration::days(30),
            rule_rate_limit_window: chrono::Duration::hours(1),
        }
    }
}

impl From<&Config> for AnalyzerSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_concurrency: config.analyzer.batch_concurrency.max(1),
            analysis_timeout: Duration::from_millis(config.analyzer.analysis_timeout_ms),
            history_window: chrono::Duration::days(config.analyzer.history_window_days.max(0)),
            rule_rate_limit_window: chrono::Duration::seconds(config.rules.rate_limit_window_secs as i64),
        }
    }
}

/// Orchestrates one analysis end to end and owns the review workflow.
///
/// Rule evaluation and the ML call run concurrently. Nothing is written
/// until the combined result exists; the analysis is stored first, then
/// trigger statistics and rate-limit windows advance, then alerts go out.
pub struct FraudAnalyzer {
    context_builder: ContextBuilder,
    rules: Arc<dyn RuleStorage>,
    analyses: Arc<dyn AnalysisStorage>,
    ml: Arc<dyn MlClient>,
    alerts: Arc<dyn AlertSink>,
    engine: RuleEngine,
    combiner: ScoreCombiner,
    settings: AnalyzerSettings,
}

impl FraudAnalyzer {
    pub fn new(deps: AnalyzerDeps, combiner: ScoreCombiner, settings: AnalyzerSettings) -> Self {
        let engine = RuleEngine::new(Arc::new(RuleRateLimiter::new(settings.rule_rate_limit_window)));
        Self {
            context_builder: ContextBuilder::new(deps.expenses, settings.history_window),
            rules: deps.rules,
            analyses: deps.analyses,
            ml: deps.ml,
            alerts: deps.alerts,
            engine,
            combiner,
            settings,
        }
    }

    pub fn from_config(deps: AnalyzerDeps, config: &Config) -> Result<Self, ScoringError> {
        let combiner = ScoreCombiner::from_config(&config.scoring)?;
        Ok(Self::new(deps, combiner, AnalyzerSettings::from(config)))
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<FraudAnalysis, ScoringError> {
        self.run_analysis(request, self.settings.analysis_timeout).await
    }

    /// Like [`analyze`](Self::analyze) with a caller deadline for the ML
    /// leg. When it expires the ML call is dropped and the rule-only
    /// fallback is returned.
    ///
    /// Only the ML call is bounded. Context building and persistence run
    /// to completion so that an expired deadline still yields a stored
    /// analysis.
    pub async fn analyze_within(
        &self,
        request: &AnalysisRequest,
        deadline: Duration,
    ) -> Result<FraudAnalysis, ScoringError> {
        self.run_analysis(request, deadline.min(self.settings.analysis_timeout)).await
    }

    /// Analyses requests with bounded concurrency. Results keep the input
    /// order and failures are reported per slot.
    pub async fn analyze_batch(&self, requests: Vec<AnalysisRequest>) -> Vec<Result<FraudAnalysis, ScoringError>> {
        let total = requests.len();
        let results: Vec<Result<FraudAnalysis, ScoringError>> = stream::iter(requests)
            .map(|request| async move { self.analyze(&request).await })
            .buffered(self.settings.batch_concurrency.max(1))
            .collect()
            .await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, failed, "Batch analysis finished");
        results
    }

    async fn run_analysis(&self, request: &AnalysisRequest, ml_deadline: Duration) -> Result<FraudAnalysis, ScoringError> {
        let started = Instant::now();
        let context = self.context_builder.build(request).await?;
        let active_rules = self.rules.get_active_rules(None).await?;
        let now = Utc::now();

        let rules_leg = async { self.engine.evaluate(&context, &active_rules, now) };
        let ml_leg = async {
            match timeout(ml_deadline, self.ml.predict(&context)).await {
                Ok(result) => result,
                Err(_) => Err(MlError::Timeout),
            }
        };
        let (rule_outcome, ml_result) = tokio::join!(rules_leg, ml_leg);

        if let Err(e) = &ml_result {
            counter!("fraud_ml_failures_total", "kind" => e.kind()).increment(1);
            debug!(payer_id = %context.payer_id(), error = %e, "Falling back to rule-only score");
        }

        let draft = self.combiner.combine(&context, &rule_outcome, ml_result);
        let analysis = FraudAnalysis::new(draft, self.combiner.thresholds(), now);

        if let Err(e) = self.analyses.save_analysis(&analysis).await {
            self.engine.release_reservations(&rule_outcome, now);
            return Err(e);
        }

        let triggered = rule_outcome.triggered_rule_ids();
        if !triggered.is_empty() {
            if let Err(e) = self.rules.record_triggers(&triggered, now).await {
                warn!(analysis_id = %analysis.id(), error = %e, "Failed to record rule trigger statistics");
            }
        }

        if analysis.requires_alert() {
            self.dispatch_alert(&analysis);
        }

        let mode = if analysis.is_fallback() { "fallback" } else { "ml" };
        counter!("fraud_analyses_total", "mode" => mode).increment(1);
        {
            let h = histogram!("fraud_analysis_seconds");
            h.record(started.elapsed().as_secs_f64());
        }
        info!(
            analysis_id = %analysis.id(),
            expense_id = ?analysis.expense_id(),
            payer_id = %analysis.payer_id(),
            fraud_score = analysis.fraud_score(),
            risk_level = %analysis.risk_level(),
            mode,
            rules_triggered = triggered.len(),
            rule_faults = rule_outcome.fault_count(),
            "Fraud analysis completed"
        );
        Ok(analysis)
    }

    fn dispatch_alert(&self, analysis: &FraudAnalysis) {
        let sink = self.alerts.clone();
        let alert = FraudAlert::from(analysis);
        tokio::spawn(async move {
            if let Err(e) = sink.emit(&alert).await {
                error!(analysis_id = %alert.analysis_id, error = %e, "Alert emission failed");
            }
        });
    }

    pub async fn get_analysis(&self, analysis_id: AnalysisId) -> Result<FraudAnalysis, ScoringError> {
        self.analyses
            .get_analysis(analysis_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("analysis", analysis_id.to_string()))
    }

    pub async fn pending_reviews(&self, limit: usize) -> Result<Vec<FraudAnalysis>, ScoringError> {
        self.analyses.pending_reviews(limit.clamp(1, MAX_PENDING_PAGE)).await
    }

    pub async fn review(&self, analysis_id: AnalysisId, reviewer: &str, notes: &str) -> Result<FraudAnalysis, ScoringError> {
        let analysis = self
            .transition(analysis_id, |a, at| a.review(reviewer, notes, at))
            .await?;
        info!(%analysis_id, reviewer, "Analysis reviewed");
        Ok(analysis)
    }

    pub async fn dismiss(&self, analysis_id: AnalysisId, reviewer: &str, reason: &str) -> Result<FraudAnalysis, ScoringError> {
        let analysis = self
            .transition(analysis_id, |a, at| a.dismiss(reviewer, reason, at))
            .await?;
        info!(%analysis_id, reviewer, "Analysis dismissed");
        Ok(analysis)
    }

    /// Labels the analysis. Positive labels feed back into the effectiveness
    /// counters of every rule that contributed to it.
    pub async fn classify(
        &self,
        analysis_id: AnalysisId,
        classifier: &str,
        classification: Classification,
    ) -> Result<FraudAnalysis, ScoringError> {
        let analysis = self
            .transition(analysis_id, |a, at| a.classify(classifier, classification, at))
            .await?;

        let contributing = analysis.contributing_rule_ids();
        if !contributing.is_empty() {
            // the label is already stored, so the caller must learn the counters are behind
            if let Err(e) = self.rules.record_feedback(&contributing, classification).await {
                error!(%analysis_id, error = %e, rules = ?contributing, "Failed to record rule feedback");
                return Err(ScoringError::Persistence(format!(
                    "analysis {} classified as {} but rule feedback was not recorded: {}",
                    analysis_id, classification, e
                )));
            }
        }
        info!(%analysis_id, %classification, rules = contributing.len(), "Analysis classified");
        Ok(analysis)
    }

    async fn transition<F>(&self, analysis_id: AnalysisId, apply: F) -> Result<FraudAnalysis, ScoringError>
    where
        F: FnOnce(&mut FraudAnalysis, DateTime<Utc>) -> Result<(), ScoringError>,
    {
        let mut analysis = self.get_analysis(analysis_id).await?;
        let expected_revision = analysis.revision();
        apply(&mut analysis, Utc::now())?;
        self.analyses.update_analysis(&analysis, expected_revision).await?;
        Ok(analysis)
    }

    /// Active rules by descending priority, then id.
    pub async fn get_active_rules(&self, category: Option<RuleCategory>) -> Result<Vec<FraudRule>, ScoringError> {
        let mut rules = self.rules.get_active_rules(category).await?;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    pub async fn list_rules(&self) -> Result<Vec<FraudRule>, ScoringError> {
        self.rules.list_rules().await
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<FraudRule, ScoringError> {
        self.rules
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("rule", rule_id))
    }

    pub async fn create_rule(&self, mut rule: FraudRule, author: &str) -> Result<FraudRule, ScoringError> {
        validate_rule(&rule)?;
        rule.version = 1;
        rule.statistics = RuleStatistics::default();
        rule.updated_by = Some(author.to_string());
        rule.updated_at = Some(Utc::now());
        self.rules.create_rule(&rule).await?;
        info!(rule_id = %rule.id, author, "Rule created");
        Ok(rule)
    }

    /// Replaces a rule's configuration, keeping the previous one as a version.
    pub async fn update_rule(&self, rule_id: &str, mut rule: FraudRule, editor: &str) -> Result<FraudRule, ScoringError> {
        if rule.id != rule_id {
            if !rule.id.trim().is_empty() {
                return Err(ScoringError::InvalidInput(format!(
                    "rule id {} does not match path id {}",
                    rule.id, rule_id
                )));
            }
            rule.id = rule_id.to_string();
        }
        validate_rule(&rule)?;
        let updated = self.rules.update_rule(&rule, editor, Utc::now()).await?;
        info!(rule_id, version = updated.version, editor, "Rule updated");
        Ok(updated)
    }

    pub async fn rule_versions(&self, rule_id: &str) -> Result<Vec<RuleVersion>, ScoringError> {
        self.get_rule(rule_id).await?;
        self.rules.rule_versions(rule_id).await
    }
}
