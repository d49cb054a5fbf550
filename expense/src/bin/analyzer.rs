use std::error::Error;
use std::sync::Arc;

use scoring::{
    alerts::sink_from_config,
    analyzer::{AnalyzerDeps, FraudAnalyzer},
    executable_utils::{initialize_executable, initialize_metrics, initialize_tracing, run_server},
    ml::client_from_config,
    storage::PgStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = initialize_executable()?;
    initialize_tracing(&config.backend.log_level);
    initialize_metrics(config.backend.metrics_address.as_deref())?;
    tracing::info!(project = %config.common.project_name, "Starting fraud analyzer");

    let store = Arc::new(PgStore::new(&config.common.database_url).await?);
    store.ensure_schema().await?;

    let deps = AnalyzerDeps {
        expenses: store.clone(),
        rules: store.clone(),
        analyses: store,
        ml: client_from_config(&config.ml)?,
        alerts: sink_from_config(&config.alerts)?,
    };
    let analyzer = Arc::new(FraudAnalyzer::from_config(deps, &config)?);

    run_server(config.backend, analyzer).await
}
