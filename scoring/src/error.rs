use thiserror::Error;

use crate::model::AnalysisId;

pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the fraud engine to its callers.
///
/// ML failures never appear here: they are converted into a fallback
/// analysis (see [`MlError`]). Rule misconfiguration never appears here
/// either: it is contained per rule as a [`RuleFault`].
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Cannot build analysis context: {0}")]
    ContextBuild(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Analysis {analysis_id} cannot go to {attempted}: current state is {current}")]
    InvalidTransition {
        analysis_id: AnalysisId,
        current: String,
        attempted: String,
    },

    #[error("Analysis {0} was modified concurrently")]
    Conflict(AnalysisId),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid rule definition: {0}")]
    InvalidRule(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ScoringError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Short stable name used for batch slots, metrics and HTTP payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoringError::ContextBuild(_) => "context_build",
            ScoringError::Persistence(_) => "persistence",
            ScoringError::InvalidTransition { .. } => "invalid_transition",
            ScoringError::Conflict(_) => "conflict",
            ScoringError::NotFound { .. } => "not_found",
            ScoringError::InvalidInput(_) => "invalid_input",
            ScoringError::InvalidRule(_) => "invalid_rule",
            ScoringError::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<sqlx::Error> for ScoringError {
    fn from(e: sqlx::Error) -> Self {
        ScoringError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ScoringError {
    fn from(e: serde_json::Error) -> Self {
        ScoringError::Persistence(format!("serialization: {}", e))
    }
}

/// Typed failure of the external model call. All variants are recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MlError {
    #[error("ML call timed out")]
    Timeout,

    #[error("ML service unavailable: {0}")]
    Unavailable(String),

    #[error("ML service rate limited the request")]
    RateLimited,

    #[error("ML model error: {0}")]
    ModelError(String),
}

impl MlError {
    pub fn kind(&self) -> &'static str {
        match self {
            MlError::Timeout => "timeout",
            MlError::Unavailable(_) => "unavailable",
            MlError::RateLimited => "rate_limited",
            MlError::ModelError(_) => "model_error",
        }
    }
}

/// A misconfigured rule or condition. Contained to the rule that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleFault {
    #[error("unsupported operator on field '{0}'")]
    UnsupportedOperator(String),

    #[error("malformed bounds for '{field}': {detail}")]
    MalformedBounds { field: String, detail: String },

    #[error("invalid regex '{pattern}': {detail}")]
    InvalidRegex { pattern: String, detail: String },

    #[error("operator on field '{field}' expects an array value")]
    ExpectedArray { field: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}
