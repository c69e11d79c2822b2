//! Counters kept per breaker and aggregated across services.

use super::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-breaker call accounting
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls refused while Open or while a HalfOpen trial was outstanding
    pub rejected_count: u64,
    pub transition_count: u64,
    pub current_state: CircuitState,
    pub failure_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            transition_count: 0,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            last_failure_at: None,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.total_calls += 1;
        self.success_count += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.total_calls += 1;
        self.failure_count += 1;
        self.last_failure_at = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self, state: CircuitState) -> Self {
        let mut snapshot = self.clone();
        snapshot.current_state = state;
        if self.total_calls > 0 {
            snapshot.failure_rate = self.failure_count as f64 / self.total_calls as f64;
        }
        snapshot
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Breaker metrics across every registered service
#[derive(Debug, Clone, Serialize)]
pub struct SystemCircuitBreakerMetrics {
    pub breakers: BTreeMap<String, CircuitBreakerMetrics>,
    pub total_breakers: usize,
    pub open_breakers: usize,
    pub half_open_breakers: usize,
}

impl SystemCircuitBreakerMetrics {
    pub fn from_breakers(breakers: BTreeMap<String, CircuitBreakerMetrics>) -> Self {
        let open_breakers = breakers
            .values()
            .filter(|m| m.current_state == CircuitState::Open)
            .count();
        let half_open_breakers = breakers
            .values()
            .filter(|m| m.current_state == CircuitState::HalfOpen)
            .count();
        Self {
            total_breakers: breakers.len(),
            open_breakers,
            half_open_breakers,
            breakers,
        }
    }

    /// True when no breaker is refusing traffic
    pub fn all_closed(&self) -> bool {
        self.open_breakers == 0 && self.half_open_breakers == 0
    }
}
