use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

use crate::{
    error::{GenericError, ScoringError},
    model::{AnalysisId, EntityId, FraudAnalysis, RiskLevel},
};
use common::config::AlertsConfig;

/// Notification emitted for analyses that require an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub analysis_id: AnalysisId,
    pub expense_id: Option<EntityId>,
    pub payer_id: EntityId,
    pub group_id: Option<EntityId>,
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    pub auto_flag: bool,
    pub explanation: String,
    pub triggered_rules: Vec<EntityId>,
    pub created_at: DateTime<Utc>,
}

impl From<&FraudAnalysis> for FraudAlert {
    fn from(analysis: &FraudAnalysis) -> Self {
        Self {
            analysis_id: analysis.id(),
            expense_id: analysis.expense_id().map(str::to_string),
            payer_id: analysis.payer_id().to_string(),
            group_id: analysis.group_id().map(str::to_string),
            fraud_score: analysis.fraud_score(),
            risk_level: analysis.risk_level(),
            auto_flag: analysis.auto_flag(),
            explanation: analysis.explanation().to_string(),
            triggered_rules: analysis.contributing_rule_ids(),
            created_at: analysis.created_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub target: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: &FraudAlert) -> Result<Vec<DeliveryReport>, GenericError>;
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn emit(&self, alert: &FraudAlert) -> Result<Vec<DeliveryReport>, GenericError> {
        warn!(
            analysis_id = %alert.analysis_id,
            payer_id = %alert.payer_id,
            fraud_score = alert.fraud_score,
            auto_flag = alert.auto_flag,
            "Fraud alert: {}",
            alert.explanation
        );
        Ok(vec![DeliveryReport {
            target: "log".to_string(),
            delivered: true,
            error: None,
        }])
    }
}

/// Posts each alert as JSON to every configured URL.
pub struct WebhookAlertSink {
    client: Client,
    urls: Vec<Url>,
}

impl WebhookAlertSink {
    pub fn new(urls: &[String], timeout: Duration) -> Result<Self, ScoringError> {
        let urls = urls
            .iter()
            .map(|u| Url::parse(u).map_err(|e| ScoringError::InvalidConfig(format!("alert url '{}': {}", u, e))))
            .collect::<Result<Vec<_>, _>>()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScoringError::InvalidConfig(e.to_string()))?;
        Ok(Self { client, urls })
    }

    async fn deliver(&self, url: &Url, alert: &FraudAlert) -> DeliveryReport {
        let outcome = match self.client.post(url.clone()).json(alert).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("HTTP {}", response.status())),
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(()) => DeliveryReport {
                target: url.to_string(),
                delivered: true,
                error: None,
            },
            Err(error) => {
                warn!(url = %url, analysis_id = %alert.analysis_id, %error, "Alert webhook failed");
                DeliveryReport {
                    target: url.to_string(),
                    delivered: false,
                    error: Some(error),
                }
            }
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn emit(&self, alert: &FraudAlert) -> Result<Vec<DeliveryReport>, GenericError> {
        let reports = join_all(self.urls.iter().map(|url| self.deliver(url, alert))).await;
        let delivered = reports.iter().filter(|r| r.delivered).count();
        info!(
            analysis_id = %alert.analysis_id,
            delivered,
            targets = reports.len(),
            "Fraud alert dispatched"
        );
        Ok(reports)
    }
}

/// Webhook sink when URLs are configured, logging sink otherwise.
pub fn sink_from_config(config: &AlertsConfig) -> Result<Arc<dyn AlertSink>, ScoringError> {
    if config.webhook_urls.is_empty() {
        return Ok(Arc::new(LoggingAlertSink));
    }
    Ok(Arc::new(WebhookAlertSink::new(
        &config.webhook_urls,
        Duration::from_millis(config.timeout_ms),
    )?))
}
