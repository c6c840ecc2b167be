use crate::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Health of the classification endpoint as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Last request succeeded or none has been made
    Idle,
    /// The n-th consecutive failure of the current tick's sequence
    Retrying(u32),
    /// Retries exhausted; only an external reset leaves this state
    Unavailable,
}

impl CircuitState {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CircuitState::Unavailable)
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Idle => write!(f, "idle"),
            CircuitState::Retrying(attempt) => write!(f, "retrying({})", attempt),
            CircuitState::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A state change, reported so callers can publish it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl CircuitTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Retry bound and exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay before the given retry (1-based): `min(base * 2^(retry-1), max)`.
    ///
    /// The exponent counts retries already made, not attempts, so the gap
    /// before the second attempt is exactly `base_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Total requests a permanently failing endpoint receives per sequence
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Consecutive-failure state machine guarding the endpoint
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: BackoffPolicy,
    state: CircuitState,
    failures: u32,
}

impl CircuitBreaker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: CircuitState::Idle,
            failures: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Consecutive failures in the current sequence
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count one failed attempt
    pub fn record_failure(&mut self) -> CircuitTransition {
        if self.state.is_unavailable() {
            return self.transition(CircuitState::Unavailable);
        }

        self.failures += 1;
        let next = if self.failures > self.policy.max_retries {
            error!(
                "Classification endpoint failed {} consecutive attempts, marking unavailable",
                self.failures
            );
            CircuitState::Unavailable
        } else {
            warn!(
                "Classification attempt failed ({}/{} retries budgeted)",
                self.failures, self.policy.max_retries
            );
            CircuitState::Retrying(self.failures)
        };
        self.transition(next)
    }

    /// Any success clears the sequence, including the retry budget
    pub fn record_success(&mut self) -> CircuitTransition {
        if self.state.is_unavailable() {
            return self.transition(CircuitState::Unavailable);
        }
        if self.failures > 0 {
            info!(
                "Classification endpoint recovered after {} failed attempts",
                self.failures
            );
        }
        self.failures = 0;
        self.transition(CircuitState::Idle)
    }

    /// Close a sequence that ended without success or exhaustion
    pub fn end_sequence(&mut self) -> CircuitTransition {
        if self.state.is_unavailable() {
            return self.transition(CircuitState::Unavailable);
        }
        self.failures = 0;
        self.transition(CircuitState::Idle)
    }

    /// External reset, the only way out of `Unavailable`
    pub fn reset(&mut self) -> CircuitTransition {
        self.failures = 0;
        let transition = self.transition(CircuitState::Idle);
        if transition.changed() {
            info!("Circuit reset from {} to idle", transition.from);
        }
        transition
    }

    /// Backoff before the next retry of the current sequence
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for_retry(self.failures.max(1))
    }

    fn transition(&mut self, to: CircuitState) -> CircuitTransition {
        let from = self.state;
        self.state = to;
        if from != to {
            debug!("Circuit state changed: {} -> {}", from, to);
        }
        CircuitTransition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_backoff_delays_are_capped() {
        let policy = policy(5);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_retry(40), Duration::from_millis(350));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[test]
    fn test_failures_walk_to_unavailable() {
        let mut breaker = CircuitBreaker::new(policy(3));

        assert_eq!(breaker.record_failure().to, CircuitState::Retrying(1));
        assert_eq!(breaker.record_failure().to, CircuitState::Retrying(2));
        assert_eq!(breaker.record_failure().to, CircuitState::Retrying(3));
        let last = breaker.record_failure();
        assert_eq!(last.from, CircuitState::Retrying(3));
        assert_eq!(last.to, CircuitState::Unavailable);

        // a late success does not reopen the circuit
        assert_eq!(breaker.record_success().to, CircuitState::Unavailable);
    }

    #[test]
    fn test_unavailable_is_sticky_without_reset() {
        let mut breaker = CircuitBreaker::new(policy(0));
        assert_eq!(breaker.record_failure().to, CircuitState::Unavailable);
        assert_eq!(breaker.end_sequence().to, CircuitState::Unavailable);
        assert_eq!(breaker.record_failure().to, CircuitState::Unavailable);

        let reset = breaker.reset();
        assert!(reset.changed());
        assert_eq!(breaker.state(), CircuitState::Idle);
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn test_success_resets_budget() {
        let mut breaker = CircuitBreaker::new(policy(3));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.next_delay(), Duration::from_millis(200));

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Idle);
        assert_eq!(breaker.record_failure().to, CircuitState::Retrying(1));
        assert_eq!(breaker.next_delay(), Duration::from_millis(100));
    }
}
