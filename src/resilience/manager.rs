//! Per-service breaker table.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use super::clock::Clock;
use super::metrics::SystemCircuitBreakerMetrics;
use crate::config::ServiceDescriptor;
use crate::error::{ResilienceError, Result};
use crate::events::EventPublisher;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Owns one [`CircuitBreaker`] per registered service.
///
/// Constructed explicitly and shared by the gateway and health monitor, so
/// independent instances never share breaker state.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new<'a>(
        services: impl IntoIterator<Item = &'a ServiceDescriptor>,
        clock: Arc<dyn Clock>,
        events: Option<EventPublisher>,
    ) -> Self {
        let breakers = DashMap::new();
        for service in services {
            let mut breaker = CircuitBreaker::for_service(service, clock.clone());
            if let Some(publisher) = &events {
                breaker = breaker.with_events(publisher.clone());
            }
            breakers.insert(service.id.clone(), Arc::new(breaker));
        }

        info!(breakers = breakers.len(), "🛡️ Circuit breaker manager initialized");
        Self { breakers }
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service_id).map(|entry| entry.value().clone())
    }

    /// Breaker for a service, failing for ids that were never registered
    pub fn breaker(&self, service_id: &str) -> Result<Arc<CircuitBreaker>> {
        self.get(service_id)
            .ok_or_else(|| ResilienceError::UnknownService(service_id.to_string()))
    }

    pub fn allow_request(&self, service_id: &str) -> Result<bool> {
        Ok(self.breaker(service_id)?.allow_request())
    }

    pub fn record_success(&self, service_id: &str) -> Result<()> {
        self.breaker(service_id)?.record_success();
        Ok(())
    }

    pub fn record_failure(&self, service_id: &str) -> Result<()> {
        self.breaker(service_id)?.record_failure();
        Ok(())
    }

    pub fn get_state(&self, service_id: &str) -> Result<CircuitBreakerState> {
        Ok(self.breaker(service_id)?.snapshot())
    }

    pub fn reset(&self, service_id: &str) -> Result<()> {
        self.breaker(service_id)?.reset();
        Ok(())
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Snapshots ordered by service id
    pub fn all_states(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<_> = self.breakers.iter().map(|e| e.value().snapshot()).collect();
        states.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        states
    }

    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let breakers: BTreeMap<_, _> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().metrics()))
            .collect();
        SystemCircuitBreakerMetrics::from_breakers(breakers)
    }

    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
