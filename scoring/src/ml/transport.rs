use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::ScoringError, model::AnalysisContext};

/// Response body of the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlPrediction {
    pub score: f64,
    pub confidence: f64,
    pub model_version: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}

/// Raw failure of one request, before it is classified into an `MlError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connection refused, reset, DNS failure or similar; retryable
    Connection(String),
    Status { status: u16, body: String },
    Decode(String),
}

#[async_trait]
pub trait MlTransport: Send + Sync {
    async fn post(&self, context: &AnalysisContext) -> Result<MlPrediction, TransportFailure>;
}

/// Posts the serialized context to the configured endpoint.
pub struct HttpMlTransport {
    client: Client,
    endpoint: Url,
}

impl HttpMlTransport {
    pub fn new(endpoint: &str) -> Result<Self, ScoringError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ScoringError::InvalidConfig(format!("ml.endpoint '{}': {}", endpoint, e)))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
        })
    }

    pub fn with_client(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl MlTransport for HttpMlTransport {
    async fn post(&self, context: &AnalysisContext) -> Result<MlPrediction, TransportFailure> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(context)
            .send()
            .await
            .map_err(|e| TransportFailure::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<MlPrediction>()
            .await
            .map_err(|e| TransportFailure::Decode(e.to_string()))
    }
}
