use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use super::{
    MlClient,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    transport::{MlPrediction, MlTransport, TransportFailure},
};
use crate::{
    error::MlError,
    model::{AnalysisContext, EntityId, MlOutput},
    rate_limit::SlidingWindowCounter,
};

#[derive(Debug, Clone)]
pub struct MlClientSettings {
    /// Bounds one prediction including its retry
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub rate_limit_max_calls: u32,
    pub rate_limit_window: Duration,
    pub circuit: CircuitBreakerConfig,
}

impl From<&common::config::MlConfig> for MlClientSettings {
    fn from(config: &common::config::MlConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            rate_limit_max_calls: config.rate_limit_max_calls,
            rate_limit_window: Duration::from_secs(config.rate_limit_window_secs),
            circuit: CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold.max(1),
                open_duration: Duration::from_secs(config.circuit_open_secs),
            },
        }
    }
}

/// ML client with caching, client-side rate limiting, a circuit breaker,
/// a per-call timeout and a single retry on connection failures.
///
/// It never invents a score: every failure is returned to the caller.
pub struct MlRiskClient {
    transport: Arc<dyn MlTransport>,
    settings: MlClientSettings,
    cache: DashMap<EntityId, (Instant, MlOutput)>,
    rate_limiter: SlidingWindowCounter,
    breaker: CircuitBreaker,
    started: Instant,
    /// Milliseconds after `started` of the last sweep of expired state
    last_sweep_ms: AtomicU64,
}

impl MlRiskClient {
    pub fn new(transport: Arc<dyn MlTransport>, settings: MlClientSettings) -> Self {
        let breaker = CircuitBreaker::new(settings.circuit.clone());
        Self {
            transport,
            settings,
            cache: DashMap::new(),
            rate_limiter: SlidingWindowCounter::new(),
            breaker,
            started: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    fn rate_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.rate_limit_window).unwrap_or(chrono::Duration::minutes(1))
    }

    /// Drops expired cache entries and idle rate-limit scopes, at most once
    /// per cache TTL or rate window, whichever is shorter.
    fn sweep_expired(&self) {
        let interval = self
            .settings
            .cache_ttl
            .min(self.settings.rate_limit_window)
            .max(Duration::from_millis(1))
            .as_millis() as u64;
        let now_ms = self.started.elapsed().as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let ttl = self.settings.cache_ttl;
        let before = self.cache.len();
        self.cache.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        self.rate_limiter.sweep(self.rate_window(), Utc::now());
        debug!(
            evicted = before.saturating_sub(self.cache.len()),
            scopes = self.rate_limiter.tracked_keys(),
            "Swept expired ML client state"
        );
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn tracked_scopes(&self) -> usize {
        self.rate_limiter.tracked_keys()
    }

    fn cached(&self, expense_id: &str) -> Option<MlOutput> {
        let fresh = self
            .cache
            .get(expense_id)
            .filter(|entry| entry.0.elapsed() < self.settings.cache_ttl)
            .map(|entry| entry.1.clone());
        if fresh.is_none() {
            self.cache.remove(expense_id);
        }
        fresh
    }

    async fn call_with_retry(&self, context: &AnalysisContext) -> Result<MlPrediction, MlError> {
        let outcome = match self.transport.post(context).await {
            Err(TransportFailure::Connection(reason)) => {
                debug!(scope = %context.scope_key(), %reason, "ML connection failed, retrying once");
                self.transport.post(context).await
            }
            other => other,
        };
        outcome.map_err(classify)
    }

    async fn record_outcome(&self, result: &Result<MlOutput, MlError>) {
        match result {
            Err(MlError::Timeout) | Err(MlError::Unavailable(_)) => self.breaker.record_failure().await,
            // the service answered, so it is reachable
            Ok(_) | Err(MlError::RateLimited) | Err(MlError::ModelError(_)) => self.breaker.record_success().await,
        }
    }
}

#[async_trait]
impl MlClient for MlRiskClient {
    async fn predict(&self, context: &AnalysisContext) -> Result<MlOutput, MlError> {
        if let Some(expense_id) = context.expense_id() {
            if let Some(mut output) = self.cached(expense_id) {
                output.cached = true;
                return Ok(output);
            }
        }

        self.sweep_expired();

        let scope = context.scope_key();
        if !self
            .rate_limiter
            .try_acquire(&scope, self.settings.rate_limit_max_calls, self.rate_window(), Utc::now())
        {
            debug!(%scope, "ML client-side rate limit reached");
            return Err(MlError::RateLimited);
        }

        if !self.breaker.try_acquire().await {
            return Err(MlError::Unavailable("circuit open".to_string()));
        }

        let result = match timeout(self.settings.timeout, self.call_with_retry(context)).await {
            Err(_) => Err(MlError::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(prediction)) => into_output(prediction),
        };
        self.record_outcome(&result).await;

        match &result {
            Ok(output) => {
                if let Some(expense_id) = context.expense_id() {
                    self.cache
                        .insert(expense_id.to_string(), (Instant::now(), output.clone()));
                }
            }
            Err(e) => warn!(%scope, error = %e, "ML prediction failed"),
        }
        result
    }
}

fn classify(failure: TransportFailure) -> MlError {
    match failure {
        TransportFailure::Connection(reason) => MlError::Unavailable(reason),
        TransportFailure::Status { status: 429, .. } => MlError::RateLimited,
        TransportFailure::Status { status, body } if (500..600).contains(&status) => {
            MlError::Unavailable(format!("HTTP {}: {}", status, body))
        }
        TransportFailure::Status { status, body } => MlError::ModelError(format!("HTTP {}: {}", status, body)),
        TransportFailure::Decode(reason) => MlError::ModelError(format!("undecodable response: {}", reason)),
    }
}

fn into_output(prediction: MlPrediction) -> Result<MlOutput, MlError> {
    let in_range = |v: f64| (0.0..=1.0).contains(&v);
    if !in_range(prediction.score) || !in_range(prediction.confidence) {
        return Err(MlError::ModelError(format!(
            "score {} / confidence {} outside [0, 1]",
            prediction.score, prediction.confidence
        )));
    }
    Ok(MlOutput {
        score: prediction.score,
        confidence: prediction.confidence,
        model_version: prediction.model_version,
        explanation: prediction.explanation,
        feature_attributions: prediction.features,
        cached: false,
    })
}

/// Client used when no endpoint is configured: every analysis falls back
/// to the rule score.
#[derive(Debug, Default)]
pub struct DisabledMlClient;

#[async_trait]
impl MlClient for DisabledMlClient {
    async fn predict(&self, _context: &AnalysisContext) -> Result<MlOutput, MlError> {
        Err(MlError::Unavailable("ML endpoint not configured".to_string()))
    }
}
