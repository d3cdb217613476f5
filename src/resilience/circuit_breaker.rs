//! Circuit breaker for external store clients.
//!
//! CLOSED passes calls through, OPEN rejects immediately, HALF_OPEN allows
//! one trial call after the recovery timeout. Breaker state is shared
//! process-wide per service and feeds the health monitor on open/close.

use super::HealthMonitor;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Per-service circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
    health: Arc<HealthMonitor>,
}

impl CircuitBreaker {
    pub fn new(
        service: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            service: service.into(),
            failure_threshold,
            recovery_timeout,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            health,
        }
    }

    /// Admission check. OPEN rejects unless the recovery timeout elapsed,
    /// in which case the breaker moves to HALF_OPEN and admits one trial.
    pub fn guard(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::storage("breaker lock poisoned"))?;

        if state.state == CircuitState::Open {
            let elapsed = state
                .last_failure
                .map(|at| at.elapsed() >= self.recovery_timeout)
                .unwrap_or(true);
            if elapsed {
                state.state = CircuitState::HalfOpen;
                tracing::info!(service = %self.service, "circuit_breaker_half_open");
            } else {
                return Err(Error::CircuitOpen);
            }
        }
        Ok(())
    }

    /// Record a successful call. A HALF_OPEN trial success closes the
    /// breaker and reports recovery to the health monitor.
    pub fn on_success(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.state == CircuitState::HalfOpen {
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            tracing::info!(service = %self.service, "circuit_breaker_closed");
            self.health.report_service_recovery(&self.service);
        }
    }

    /// Record a failed call. Reaching the threshold (or failing the
    /// HALF_OPEN trial) opens the breaker.
    pub fn on_failure(&self, error: &Error) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());

        tracing::warn!(
            service = %self.service,
            failures = state.failure_count,
            threshold = self.failure_threshold,
            error = %error,
            "circuit_breaker_failure"
        );

        let should_open = state.state == CircuitState::HalfOpen
            || state.failure_count >= self.failure_threshold;
        if should_open && state.state != CircuitState::Open {
            state.state = CircuitState::Open;
            tracing::error!(
                service = %self.service,
                failures = state.failure_count,
                "circuit_breaker_opened"
            );
            self.health.report_service_error(&self.service, error);
        }
    }

    /// Run an operation under the breaker.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.guard()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure(&error);
                Err(error)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
            .lock()
            .map(|state| state.state)
            .unwrap_or(CircuitState::Open)
    }

    /// Force the breaker back to CLOSED.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            state.last_failure = None;
            tracing::info!(service = %self.service, "circuit_breaker_reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::SERVICE_REDIS;

    fn breaker(threshold: u32, recovery: Duration) -> (CircuitBreaker, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new(3));
        let breaker = CircuitBreaker::new(SERVICE_REDIS, threshold, recovery, health.clone());
        (breaker, health)
    }

    fn storage_error() -> Error {
        Error::storage("connection refused")
    }

    #[test]
    fn test_opens_after_exact_threshold() {
        let (breaker, _) = breaker(5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.on_failure(&storage_error());
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.on_failure(&storage_error());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.guard(), Err(Error::CircuitOpen)));
    }

    #[test]
    fn test_open_rejection_message() {
        let (breaker, _) = breaker(1, Duration::from_secs(60));
        breaker.on_failure(&storage_error());
        let err = breaker.guard().unwrap_err();
        assert_eq!(err.to_string(), "Circuit breaker is OPEN");
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes_and_reports_recovery() {
        let (breaker, health) = breaker(1, Duration::from_millis(1));
        breaker.on_failure(&storage_error());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let result: Result<u32> = breaker.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(health.is_service_available(SERVICE_REDIS));
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let (breaker, _) = breaker(1, Duration::from_millis(1));
        breaker.on_failure(&storage_error());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result: Result<u32> = breaker
            .call(|| async { Err(Error::storage("still down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_forces_closed() {
        let (breaker, _) = breaker(1, Duration::from_secs(60));
        breaker.on_failure(&storage_error());
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.guard().is_ok());
    }

    #[tokio::test]
    async fn test_call_passes_through_when_closed() {
        let (breaker, _) = breaker(5, Duration::from_secs(60));
        let result: Result<&str> = breaker.call(|| async { Ok("fine") }).await;
        assert_eq!(result.unwrap(), "fine");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
