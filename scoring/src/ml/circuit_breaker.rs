//! Stops calling the ML service after repeated failures and lets it recover.

use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a call may go out now. In half-open state a single probe is
    /// admitted until its outcome is recorded.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.circuit {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.open_duration);
                if cooled_down {
                    info!("ML circuit half-open, sending probe");
                    state.circuit = CircuitState::HalfOpen;
                    state.opened_at = Some(Instant::now());
                    state.probe_in_flight = true;
                }
                cooled_down
            }
            CircuitState::HalfOpen => {
                // a probe whose caller was cancelled never reports back
                let stale_probe = state
                    .opened_at
                    .is_some_and(|probed| probed.elapsed() >= self.config.open_duration);
                if state.probe_in_flight && !stale_probe {
                    return false;
                }
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = true;
                true
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.circuit != CircuitState::Closed {
            info!("ML circuit closed");
        }
        state.circuit = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        let trip = match state.circuit {
            CircuitState::Closed => state.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen | CircuitState::Open => true,
        };
        if trip {
            if state.circuit != CircuitState::Open {
                warn!(failures = state.consecutive_failures, "ML circuit opened");
            }
            state.circuit = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            state.probe_in_flight = false;
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.circuit
    }
}
