pub mod circuit_breaker;
pub mod client;
pub mod transport;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::{
    error::{MlError, ScoringError},
    model::{AnalysisContext, MlOutput},
};
use common::config::MlConfig;

pub use client::{DisabledMlClient, MlClientSettings, MlRiskClient};
pub use transport::{HttpMlTransport, MlPrediction, MlTransport, TransportFailure};

#[async_trait]
pub trait MlClient: Send + Sync {
    async fn predict(&self, context: &AnalysisContext) -> Result<MlOutput, MlError>;
}

/// HTTP-backed client, or a disabled one when no endpoint is configured.
pub fn client_from_config(config: &MlConfig) -> Result<Arc<dyn MlClient>, ScoringError> {
    match config.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            info!(endpoint, "ML scoring enabled");
            let transport = Arc::new(HttpMlTransport::new(endpoint)?);
            Ok(Arc::new(MlRiskClient::new(transport, MlClientSettings::from(config))))
        }
        None => {
            info!("No ML endpoint configured, running rule-only");
            Ok(Arc::new(DisabledMlClient))
        }
    }
}
