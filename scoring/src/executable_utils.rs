use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use crate::{
    analyzer::FraudAnalyzer,
    error::ScoringError,
    model::{AnalysisId, AnalysisRequest, Classification, FraudAnalysis, FraudRule, RuleCategory, RuleVersion},
};
use common::config::{BackendConfig, Config};

const DEFAULT_PENDING_PAGE: usize = 50;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "target/debug/config/total_config.yaml")]
    pub config: String,
}

pub fn initialize_executable() -> Result<Config, Box<dyn Error + Send + Sync>> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    Ok(config)
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn initialize_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Starts the Prometheus scrape endpoint when an address is configured.
pub fn initialize_metrics(address: Option<&str>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(address) = address else {
        return Ok(());
    };
    let address: SocketAddr = address.parse()?;
    PrometheusBuilder::new().with_http_listener(address).install()?;
    tracing::info!(%address, "Prometheus exporter listening");
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<FraudAnalyzer>,
}

impl AppState {
    pub fn new(analyzer: Arc<FraudAnalyzer>) -> Self {
        Self { analyzer }
    }
}

/// HTTP face of [`ScoringError`].
pub struct ApiError(pub ScoringError);

impl From<ScoringError> for ApiError {
    fn from(e: ScoringError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub fn status_for(error: &ScoringError) -> StatusCode {
    match error {
        ScoringError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ScoringError::ContextBuild(_) | ScoringError::InvalidRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ScoringError::NotFound { .. } => StatusCode::NOT_FOUND,
        ScoringError::InvalidTransition { .. } | ScoringError::Conflict(_) => StatusCode::CONFLICT,
        ScoringError::Persistence(_) | ScoringError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/fraud/analyze", post(analyze_expense))
        .route("/api/fraud/analyze/batch", post(analyze_batch))
        .route("/api/fraud/analyses/pending", get(pending_reviews))
        .route("/api/fraud/analyses/{id}", get(get_analysis))
        .route("/api/fraud/analyses/{id}/review", post(review_analysis))
        .route("/api/fraud/analyses/{id}/dismiss", post(dismiss_analysis))
        .route("/api/fraud/analyses/{id}/classify", post(classify_analysis))
        .route("/api/fraud/rules", get(list_rules).post(create_rule))
        .route("/api/fraud/rules/{id}", get(get_rule).put(update_rule))
        .route("/api/fraud/rules/{id}/versions", get(rule_versions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn run_server(
    config: BackendConfig,
    analyzer: Arc<FraudAnalyzer>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let app = router(AppState::new(analyzer));

    tracing::info!("Starting fraud analysis service at {}", config.server_address);
    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    /// Caller deadline for the ML leg, capped by the configured timeout
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

pub async fn analyze_expense(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> ApiResult<FraudAnalysis> {
    let analysis = match body.deadline_ms {
        Some(ms) => state.analyzer.analyze_within(&body.request, Duration::from_millis(ms)).await?,
        None => state.analyzer.analyze(&body.request).await?,
    };
    Ok(Json(analysis))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<AnalysisRequest>,
}

/// One slot of a batch response, in request order.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSlot {
    Ok(Box<FraudAnalysis>),
    Error(ErrorBody),
}

pub async fn analyze_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<Vec<BatchSlot>> {
    let slots = state
        .analyzer
        .analyze_batch(body.requests)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(analysis) => BatchSlot::Ok(Box::new(analysis)),
            Err(e) => BatchSlot::Error(ErrorBody {
                error: e.kind().to_string(),
                message: e.to_string(),
            }),
        })
        .collect();
    Ok(Json(slots))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<usize>,
}

pub async fn pending_reviews(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Vec<FraudAnalysis>> {
    let analyses = state
        .analyzer
        .pending_reviews(query.limit.unwrap_or(DEFAULT_PENDING_PAGE))
        .await?;
    Ok(Json(analyses))
}

pub async fn get_analysis(State(state): State<AppState>, Path(id): Path<AnalysisId>) -> ApiResult<FraudAnalysis> {
    Ok(Json(state.analyzer.get_analysis(id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub reviewer: String,
    #[serde(default)]
    pub notes: String,
}

pub async fn review_analysis(
    State(state): State<AppState>,
    Path(id): Path<AnalysisId>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult<FraudAnalysis> {
    Ok(Json(state.analyzer.review(id, &body.reviewer, &body.notes).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DismissRequest {
    pub reviewer: String,
    pub reason: String,
}

pub async fn dismiss_analysis(
    State(state): State<AppState>,
    Path(id): Path<AnalysisId>,
    Json(body): Json<DismissRequest>,
) -> ApiResult<FraudAnalysis> {
    Ok(Json(state.analyzer.dismiss(id, &body.reviewer, &body.reason).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub classifier: String,
    pub classification: Classification,
}

pub async fn classify_analysis(
    State(state): State<AppState>,
    Path(id): Path<AnalysisId>,
    Json(body): Json<ClassifyRequest>,
) -> ApiResult<FraudAnalysis> {
    Ok(Json(
        state
            .analyzer
            .classify(id, &body.classifier, body.classification)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct RulesQuery {
    pub category: Option<RuleCategory>,
    /// Restrict to active rules, sorted by priority
    #[serde(default)]
    pub active: bool,
}

pub async fn list_rules(State(state): State<AppState>, Query(query): Query<RulesQuery>) -> ApiResult<Vec<FraudRule>> {
    let rules = if query.active || query.category.is_some() {
        state.analyzer.get_active_rules(query.category).await?
    } else {
        state.analyzer.list_rules().await?
    };
    Ok(Json(rules))
}

pub async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<FraudRule> {
    Ok(Json(state.analyzer.get_rule(&id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleChangeRequest {
    /// Author of a new rule or editor of an existing one
    pub user: String,
    pub rule: FraudRule,
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(body): Json<RuleChangeRequest>,
) -> Result<(StatusCode, Json<FraudRule>), ApiError> {
    let rule = state.analyzer.create_rule(body.rule, &body.user).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RuleChangeRequest>,
) -> ApiResult<FraudRule> {
    Ok(Json(state.analyzer.update_rule(&id, body.rule, &body.user).await?))
}

pub async fn rule_versions(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<RuleVersion>> {
    Ok(Json(state.analyzer.rule_versions(&id).await?))
}
