//! # Circuit Breaker (C5)
//!
//! Per-provider failure isolation. Three states:
//!
//! - **Closed** — requests pass through; consecutive failures are counted.
//! - **Open** — requests are rejected outright until the recovery timeout
//!   elapses.
//! - **Half-open** — exactly one probe request is allowed through. Success
//!   closes the circuit; failure reopens it. Unlike a multi-call half-open
//!   window, admitting more than one probe risks hammering a provider that
//!   just failed.
//!
//! Authentication and configuration errors never reach [`CircuitBreaker::on_failure`]
//! at all — [`crate::error::ErrorKind::trips_breaker`] decides that upstream,
//! so a bad API key can't make a healthy provider look unhealthy.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("circuit breaker timeout")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait in the open state before allowing a half-open probe.
    #[serde(with = "crate::common::duration_serde")]
    pub recovery_timeout: Duration,
    /// Maximum time to wait for an individual call.
    #[serde(with = "crate::common::duration_serde")]
    pub request_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
    /// Whether the single half-open probe has already been dispatched.
    probe_in_flight: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_success_time: None,
            probe_in_flight: false,
        }
    }
}

/// Per-provider circuit breaker. Owned by the provider's entry in
/// [`crate::registry::ProviderRegistry`], one instance per provider name.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CircuitBreakerState::default())),
            name,
        }
    }

    /// Execute `operation` under circuit breaker protection. On failure (or
    /// timeout) the caller is still responsible for deciding, via
    /// [`crate::error::ErrorKind::trips_breaker`], whether to call
    /// [`Self::on_failure`] at all.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.can_execute().await {
            tracing::warn!(provider = %self.name, "circuit breaker open, blocking request");
            return Err(CircuitBreakerError::Open);
        }

        let result = tokio::time::timeout(self.config.request_timeout, operation()).await;

        match result {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(_)) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Open)
            }
            Err(_) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Timeout)
            }
        }
    }

    /// Whether a call may proceed right now: closed, or open-with-elapsed
    /// recovery-timeout (which this call also transitions to half-open and
    /// admits as the probe), or half-open with no probe currently in
    /// flight. Exposed for callers (the dispatch engine) that drive the
    /// state machine manually instead of going through [`Self::call`].
    pub async fn ready(&self) -> bool {
        self.can_execute().await
    }

    /// Non-mutating version of [`Self::ready`]: reports whether a call
    /// would be admitted right now without actually reserving the
    /// half-open probe slot. Used to filter fallback candidates and to
    /// peek at the pending queue's head, where admitting a probe that then
    /// doesn't get used (because a rate limiter or queue defers the call)
    /// would strand the circuit half-open with no way to recover.
    pub async fn would_admit(&self) -> bool {
        let state = self.state.read().await;
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => state
                .last_failure_time
                .map(|t| t.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(false),
            CircuitState::HalfOpen => !state.probe_in_flight,
        }
    }

    async fn can_execute(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(false);
                if elapsed {
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    tracing::info!(provider = %self.name, "circuit breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    false
                } else {
                    state.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call. Closes the circuit if the probe succeeded.
    pub async fn on_success(&self) {
        let mut state = self.state.write().await;
        state.success_count += 1;
        state.last_success_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.probe_in_flight = false;
                tracing::info!(provider = %self.name, "circuit breaker closed after successful probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Call sites should only invoke this for error
    /// kinds where [`crate::error::ErrorKind::trips_breaker`] is true.
    pub async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    tracing::warn!(
                        provider = %self.name,
                        failures = state.failure_count,
                        "circuit breaker open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.probe_in_flight = false;
                tracing::warn!(provider = %self.name, "probe failed, circuit breaker reopened");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn get_metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state.read().await;
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
            last_success_time: state.last_success_time,
        }
    }

    pub async fn force_open(&self) {
        let mut state = self.state.write().await;
        state.state = CircuitState::Open;
        state.last_failure_time = Some(Instant::now());
    }

    pub async fn force_closed(&self) {
        let mut state = self.state.write().await;
        *state = CircuitBreakerState::default();
    }
}

#[derive(Debug)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn closed_on_success() {
        let cb = CircuitBreaker::new("test".into(), fast_config(3));
        let result = cb
            .call(|| async { Ok::<_, std::io::Error>("ok") })
            .await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test".into(), fast_config(2));
        for _ in 0..2 {
            let _ = cb
                .call(|| async { Err::<(), _>(std::io::Error::other("fail")) })
                .await;
        }
        assert_eq!(cb.get_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn only_one_probe_admitted_while_half_open() {
        let cb = CircuitBreaker::new("test".into(), fast_config(1));
        let _ = cb
            .call(|| async { Err::<(), _>(std::io::Error::other("fail")) })
            .await;
        assert_eq!(cb.get_state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cb.can_execute().await, "first probe should be admitted");
        assert!(
            !cb.can_execute().await,
            "a second concurrent probe must be rejected"
        );
    }

    #[tokio::test]
    async fn probe_success_closes_circuit() {
        let cb = CircuitBreaker::new("test".into(), fast_config(1));
        let _ = cb
            .call(|| async { Err::<(), _>(std::io::Error::other("fail")) })
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = cb.call(|| async { Ok::<_, std::io::Error>("ok") }).await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let mut config = fast_config(1);
        config.request_timeout = Duration::from_millis(20);
        let cb = CircuitBreaker::new("test".into(), config);

        let result = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, std::io::Error>("slow")
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Timeout)));
    }
}
