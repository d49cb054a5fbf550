use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;

use scoring::{
    alerts::{AlertSink, DeliveryReport, FraudAlert},
    context_builder::ExpenseStore,
    error::{GenericError, MlError, ScoringError},
    ml::{MlClient, MlPrediction, MlTransport, TransportFailure},
    model::{
        AnalysisContext, AnalysisId, Classification, EntityId, ExpenseRecord, FraudAnalysis, FraudRule, MlOutput,
        RuleCategory, RuleVersion,
    },
    storage::{AnalysisStorage, InMemoryStore, RuleStorage},
};

mock! {
    pub MlClient {}

    #[async_trait]
    impl MlClient for MlClient {
        async fn predict(&self, context: &AnalysisContext) -> Result<MlOutput, MlError>;
    }
}

mock! {
    pub MlTransport {}

    #[async_trait]
    impl MlTransport for MlTransport {
        async fn post(&self, context: &AnalysisContext) -> Result<MlPrediction, TransportFailure>;
    }
}

mock! {
    pub ExpenseStore {}

    #[async_trait]
    impl ExpenseStore for ExpenseStore {
        async fn get_expense(&self, expense_id: &str) -> Result<Option<ExpenseRecord>, ScoringError>;
        async fn user_history(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError>;
        async fn group_history(&self, group_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError>;
    }
}

mock! {
    pub AlertSink {}

    #[async_trait]
    impl AlertSink for AlertSink {
        async fn emit(&self, alert: &FraudAlert) -> Result<Vec<DeliveryReport>, GenericError>;
    }
}

mock! {
    pub AnalysisStorage {}

    #[async_trait]
    impl AnalysisStorage for AnalysisStorage {
        async fn save_analysis(&self, analysis: &FraudAnalysis) -> Result<(), ScoringError>;
        async fn get_analysis(&self, analysis_id: AnalysisId) -> Result<Option<FraudAnalysis>, ScoringError>;
        async fn update_analysis(&self, analysis: &FraudAnalysis, expected_revision: u32) -> Result<(), ScoringError>;
        async fn pending_reviews(&self, limit: usize) -> Result<Vec<FraudAnalysis>, ScoringError>;
    }
}

pub fn ml_output(score: f64, confidence: f64) -> MlOutput {
    MlOutput {
        score,
        confidence,
        model_version: "test-model-1".to_string(),
        explanation: None,
        feature_attributions: Default::default(),
        cached: false,
    }
}

pub fn prediction(score: f64, confidence: f64) -> MlPrediction {
    MlPrediction {
        score,
        confidence,
        model_version: "test-model-1".to_string(),
        explanation: None,
        features: Default::default(),
    }
}

pub fn create_mock_ml_client(result: Result<MlOutput, MlError>) -> MockMlClient {
    let mut client = MockMlClient::new();
    client.expect_predict().returning(move |_| result.clone());
    client
}

/// Transport that waits before answering and counts its calls.
pub struct SlowTransport {
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl SlowTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl MlTransport for SlowTransport {
    async fn post(&self, _context: &AnalysisContext) -> Result<MlPrediction, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(prediction(0.5, 0.5))
    }
}

/// Forwards every alert into a channel so tests can await it.
pub struct ChannelAlertSink {
    sender: mpsc::UnboundedSender<FraudAlert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FraudAlert>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn emit(&self, alert: &FraudAlert) -> Result<Vec<DeliveryReport>, GenericError> {
        self.sender.send(alert.clone())?;
        Ok(vec![DeliveryReport {
            target: "channel".to_string(),
            delivered: true,
            error: None,
        }])
    }
}

/// Rule store whose feedback writes always fail; everything else is served
/// by the wrapped in-memory store.
pub struct FeedbackFailingRules {
    pub inner: Arc<InMemoryStore>,
}

#[async_trait]
impl RuleStorage for FeedbackFailingRules {
    async fn list_rules(&self) -> Result<Vec<FraudRule>, ScoringError> {
        self.inner.list_rules().await
    }

    async fn get_active_rules(&self, category: Option<RuleCategory>) -> Result<Vec<FraudRule>, ScoringError> {
        self.inner.get_active_rules(category).await
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<FraudRule>, ScoringError> {
        self.inner.get_rule(rule_id).await
    }

    async fn create_rule(&self, rule: &FraudRule) -> Result<(), ScoringError> {
        self.inner.create_rule(rule).await
    }

    async fn update_rule(&self, rule: &FraudRule, editor: &str, at: DateTime<Utc>) -> Result<FraudRule, ScoringError> {
        self.inner.update_rule(rule, editor, at).await
    }

    async fn rule_versions(&self, rule_id: &str) -> Result<Vec<RuleVersion>, ScoringError> {
        self.inner.rule_versions(rule_id).await
    }

    async fn record_triggers(&self, rule_ids: &[EntityId], at: DateTime<Utc>) -> Result<(), ScoringError> {
        self.inner.record_triggers(rule_ids, at).await
    }

    async fn record_feedback(&self, _rule_ids: &[EntityId], _classification: Classification) -> Result<(), ScoringError> {
        Err(ScoringError::Persistence("rule table locked".to_string()))
    }
}
