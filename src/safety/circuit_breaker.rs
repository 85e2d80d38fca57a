//! Per-Policy circuit breaker (spec §4.3). `Closed -> Open` after N
//! consecutive validation failures; `Open` rejects everything until a
//! timeout elapses, then allows a single `HalfOpen` probe; a probe success
//! closes the breaker, a probe failure reopens it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Breaker>>>,
    failure_threshold: u32,
    open_timeout_secs: u64,
    success_threshold: u32,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, open_timeout_secs: u64, success_threshold: u32) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            failure_threshold: failure_threshold.max(1),
            open_timeout_secs,
            success_threshold: success_threshold.max(1),
        }
    }

    /// Returns whether a validation attempt should be allowed through for
    /// `key` right now. When the breaker is `Open` but its timeout has
    /// elapsed, this call transitions it to `HalfOpen` and reserves the
    /// single permitted probe.
    pub async fn allow(&self, key: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(key.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !breaker.probe_in_flight,
            CircuitState::Open => {
                let elapsed = breaker
                    .opened_at
                    .map(|t| t.elapsed().as_secs())
                    .unwrap_or(0);
                if elapsed >= self.open_timeout_secs {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.probe_in_flight = true;
                    breaker.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(key.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.probe_in_flight = false;
                breaker.consecutive_successes += 1;
                if breaker.consecutive_successes >= self.success_threshold {
                    breaker.state = CircuitState::Closed;
                    breaker.consecutive_failures = 0;
                    breaker.opened_at = None;
                }
            }
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self, key: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(key.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.probe_in_flight = false;
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(Instant::now());
                breaker.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    #[cfg(test)]
    pub async fn state_of(&self, key: &str) -> CircuitState {
        let breakers = self.breakers.read().await;
        breakers
            .get(key)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let registry = CircuitBreakerRegistry::new(2, 300, 1);
        let key = "default/policy-a";
        assert!(registry.allow(key).await);
        registry.record_failure(key).await;
        assert_eq!(registry.state_of(key).await, CircuitState::Closed);
        registry.record_failure(key).await;
        assert_eq!(registry.state_of(key).await, CircuitState::Open);
        assert!(!registry.allow(key).await);
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let registry = CircuitBreakerRegistry::new(1, 0, 1);
        let key = "default/policy-b";
        registry.record_failure(key).await;
        assert_eq!(registry.state_of(key).await, CircuitState::Open);
        assert!(registry.allow(key).await);
        assert_eq!(registry.state_of(key).await, CircuitState::HalfOpen);
        registry.record_success(key).await;
        assert_eq!(registry.state_of(key).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let registry = CircuitBreakerRegistry::new(1, 0, 1);
        let key = "default/policy-c";
        registry.record_failure(key).await;
        assert!(registry.allow(key).await);
        registry.record_failure(key).await;
        assert_eq!(registry.state_of(key).await, CircuitState::Open);
    }
}
