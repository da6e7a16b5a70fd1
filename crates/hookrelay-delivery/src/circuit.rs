//! Per-destination circuit breakers for failure isolation.
//!
//! Each destination gets its own breaker so a dead endpoint cannot degrade
//! delivery to healthy ones. Breakers fail fast during sustained outages
//! and probe for recovery after a timeout.
//!
//! # State machine
//!
//! ```text
//!   CLOSED ──(failure_threshold consecutive failures)──▶ OPEN
//!   OPEN ──(open_timeout elapsed, checked at call time)──▶ HALF-OPEN
//!   HALF-OPEN ──(success_threshold consecutive successes)──▶ CLOSED
//!   HALF-OPEN ──(any probe failure)──▶ OPEN
//! ```
//!
//! A short-circuited call yields [`DeliveryError::CircuitOpen`] without
//! invoking the wrapped operation; callers pattern-match that variant to
//! distinguish "never tried" from "tried and failed".

use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use hookrelay_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{DeliveryError, Result};

/// Circuit breaker thresholds shared by all destinations in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Time to wait before allowing a recovery probe.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, requests attempted.
    Closed,
    /// Destination unhealthy, requests short-circuited.
    Open,
    /// Testing recovery with probe requests.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Observable snapshot of a breaker's counters and state.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failures in the current run.
    pub consecutive_failures: u32,
    /// Consecutive successes while probing in half-open.
    pub consecutive_successes: u32,
    /// Requests observed since the circuit last closed.
    pub total_requests: u32,
    /// Failed requests since the circuit last closed.
    pub failed_requests: u32,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitStats {
    /// Failure rate over the current window (0.0 to 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            f64::from(self.failed_requests) / f64::from(self.total_requests)
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_requests: u32,
    failed_requests: u32,
    last_failure_instant: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_requests: 0,
            failed_requests: 0,
            last_failure_instant: None,
            last_failure_at: None,
        }
    }

    fn reset_counters(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.total_requests = 0;
        self.failed_requests = 0;
    }
}

/// Failure-isolation state machine for a single destination.
///
/// State mutations are serialized through an internal mutex; the lock is
/// never held across the wrapped operation's await.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given thresholds.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, state: Mutex::new(BreakerState::new()) }
    }

    /// Runs `operation` under this breaker's protection.
    ///
    /// While open and within the timeout, returns
    /// [`DeliveryError::CircuitOpen`] without invoking the operation. After
    /// the timeout the call proceeds as a recovery probe. Operation
    /// failures run the failure transition and propagate unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(open) = self.admit().await {
            return Err(open);
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            },
            Err(error) => {
                self.record_failure().await;
                Err(error)
            },
        }
    }

    /// Like [`CircuitBreaker::execute`], but routes short-circuits and
    /// operation failures through `fallback` instead of surfacing them.
    pub async fn execute_with_fallback<F, Fut, G, GFut, T>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce(DeliveryError) -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(error) => fallback(error).await,
        }
    }

    /// Returns a snapshot of the breaker's state and counters.
    pub async fn stats(&self) -> CircuitStats {
        let state = self.state.lock().await;
        CircuitStats {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Forces the breaker into a specific state (admin and test use).
    pub async fn force_state(&self, target: CircuitState) {
        let mut state = self.state.lock().await;
        state.state = target;
        match target {
            CircuitState::Open => {
                state.last_failure_instant = Some(self.clock.now());
                state.last_failure_at = Some(self.clock.now_utc());
            },
            CircuitState::Closed => state.reset_counters(),
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
            },
        }
    }

    /// Admission check, transitioning open breakers to half-open when the
    /// timeout has elapsed.
    async fn admit(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.state != CircuitState::Open {
            return Ok(());
        }

        let timed_out = state
            .last_failure_instant
            .is_none_or(|at| self.clock.now().duration_since(at) >= self.config.open_timeout);

        if timed_out {
            tracing::info!("circuit breaker transitioning to half-open for recovery probe");
            state.state = CircuitState::HalfOpen;
            state.consecutive_successes = 0;
            return Ok(());
        }

        Err(DeliveryError::circuit_open(
            state.last_failure_at.unwrap_or_else(|| self.clock.now_utc()),
        ))
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.total_requests += 1;
        state.consecutive_failures = 0;

        if state.state == CircuitState::HalfOpen {
            state.consecutive_successes += 1;
            if state.consecutive_successes >= self.config.success_threshold {
                tracing::info!("circuit breaker closing, destination recovered");
                state.state = CircuitState::Closed;
                state.reset_counters();
            }
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.total_requests += 1;
        state.failed_requests += 1;
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        state.last_failure_instant = Some(self.clock.now());
        state.last_failure_at = Some(self.clock.now_utc());

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        consecutive_failures = state.consecutive_failures,
                        "circuit breaker opening"
                    );
                    state.state = CircuitState::Open;
                }
            },
            CircuitState::HalfOpen => {
                tracing::warn!("recovery probe failed, circuit breaker reopening");
                state.state = CircuitState::Open;
            },
            CircuitState::Open => {},
        }
    }
}

/// Registry of circuit breakers keyed by destination identity.
///
/// Breakers are created lazily on first use and cached, so the same
/// destination always maps to the same instance and failures against one
/// destination never affect another's breaker. Constructed explicitly and
/// injected into the engine; tests build isolated registries per case.
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    /// Creates an empty registry applying `config` to every breaker.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, breakers: Mutex::new(HashMap::new()) }
    }

    /// Returns the breaker for a destination key, creating it on first use.
    pub async fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(self.config.clone(), self.clock.clone()))
            })
            .clone()
    }

    /// Stats for one destination, if a breaker exists for it.
    pub async fn stats(&self, key: &str) -> Option<CircuitStats> {
        let breaker = { self.breakers.lock().await.get(key).cloned() };
        match breaker {
            Some(breaker) => Some(breaker.stats().await),
            None => None,
        }
    }

    /// Stats for every destination seen so far.
    pub async fn all_stats(&self) -> HashMap<String, CircuitStats> {
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = {
            self.breakers.lock().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut stats = HashMap::with_capacity(breakers.len());
        for (key, breaker) in breakers {
            stats.insert(key, breaker.stats().await);
        }
        stats
    }
}
