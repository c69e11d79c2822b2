//! # Health Monitor
//!
//! Checks every registered service independently of user traffic so that a
//! service's health is known before a request needs it. Check results feed the
//! service's circuit breaker, including while it is Open, so recovery is
//! detected without user traffic.

use super::types::{HealthSnapshot, HealthStatus, OverallHealth};
use crate::config::{ConfigurationError, HealthConfig, ServiceDescriptor};
use crate::connectivity::Connectivity;
use crate::constants::events;
use crate::error::{ResilienceError, Result};
use crate::events::EventPublisher;
use crate::registry::HttpMethod;
use crate::resilience::{CircuitBreakerManager, CircuitState};
use crate::transport::{NetworkError, NetworkTransport, TransportRequest, TransportResponse};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct HealthMonitor {
    services: Vec<ServiceDescriptor>,
    breakers: Arc<CircuitBreakerManager>,
    transport: Arc<dyn NetworkTransport>,
    connectivity: Arc<dyn Connectivity>,
    config: HealthConfig,
    snapshots: DashMap<String, HealthSnapshot>,
    overall: watch::Sender<OverallHealth>,
    events: Option<EventPublisher>,
}

impl HealthMonitor {
    pub fn new(
        services: Vec<ServiceDescriptor>,
        breakers: Arc<CircuitBreakerManager>,
        transport: Arc<dyn NetworkTransport>,
        connectivity: Arc<dyn Connectivity>,
        config: HealthConfig,
    ) -> Self {
        let snapshots = DashMap::new();
        for service in &services {
            let breaker_state = breakers
                .get(&service.id)
                .map(|b| b.state())
                .unwrap_or(CircuitState::Closed);
            snapshots.insert(
                service.id.clone(),
                HealthSnapshot::unknown(service.id.clone(), breaker_state),
            );
        }

        let initial = OverallHealth::aggregate(
            snapshots.iter().map(|e| e.value().clone()).collect(),
            |_| false,
        );
        let (overall, _) = watch::channel(initial);

        Self {
            services,
            breakers,
            transport,
            connectivity,
            config,
            snapshots,
            overall,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    fn descriptor(&self, service_id: &str) -> Result<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|s| s.id == service_id)
            .ok_or_else(|| ResilienceError::UnknownService(service_id.to_string()))
    }

    /// Check one service and update its snapshot and breaker
    pub async fn run_health_check(&self, service_id: &str) -> Result<HealthSnapshot> {
        let service = self.descriptor(service_id)?;

        if !self.connectivity.is_online() {
            return Ok(self.mark_unknown(service_id, "device offline"));
        }

        let url = service.health_url().map_err(|reason| {
            ConfigurationError::invalid_value(
                format!("services.{service_id}.health_endpoint"),
                service.health_endpoint.clone(),
                reason,
            )
        })?;

        let request = TransportRequest {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: service.timeout(),
        };

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(service.timeout(), self.transport.send(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(NetworkError::Timeout(service.timeout())),
            };
        let latency = started.elapsed();

        let Some((status, message)) = self.evaluate(service, &outcome, latency) else {
            return Ok(self.mark_unknown(service_id, "device offline"));
        };

        let breaker = self.breakers.breaker(service_id)?;
        match status {
            HealthStatus::Unhealthy => breaker.record_failure(),
            HealthStatus::Healthy | HealthStatus::Degraded => breaker.record_success(),
            HealthStatus::Unknown => {}
        }

        let snapshot = HealthSnapshot {
            service_id: service_id.to_string(),
            status,
            last_checked_at: Some(Utc::now()),
            last_latency_ms: Some(latency.as_millis() as u64),
            breaker_state: breaker.state(),
            message,
        };

        debug!(
            service_id = %service_id,
            status = %snapshot.status,
            latency_ms = snapshot.last_latency_ms,
            "🩺 Health check completed"
        );
        self.store(snapshot.clone());
        Ok(snapshot)
    }

    /// Classify a check outcome; `None` means the failure was the device's own
    /// connectivity and must not be held against the service
    fn evaluate(
        &self,
        service: &ServiceDescriptor,
        outcome: &std::result::Result<TransportResponse, NetworkError>,
        latency: Duration,
    ) -> Option<(HealthStatus, Option<String>)> {
        match outcome {
            Ok(response) if response.is_success() => {
                if latency > self.config.degraded_latency() {
                    Some((
                        HealthStatus::Degraded,
                        Some(format!("slow response: {}ms", latency.as_millis())),
                    ))
                } else {
                    Some((HealthStatus::Healthy, None))
                }
            }
            Ok(response) if response.status >= 500 => Some((
                HealthStatus::Unhealthy,
                Some(format!("HTTP {}", response.status)),
            )),
            // Reachable, just not answering the check the way we expect
            Ok(response) => Some((
                HealthStatus::Degraded,
                Some(format!("HTTP {}", response.status)),
            )),
            Err(NetworkError::Offline) => None,
            Err(_) if !self.connectivity.is_online() => None,
            Err(e) => {
                warn!(service_id = %service.id, error = %e, "🩺 Health check failed");
                Some((HealthStatus::Unhealthy, Some(e.to_string())))
            }
        }
    }

    /// Check every service concurrently, each bounded by its own timeout
    pub async fn perform_health_check_all(&self) -> OverallHealth {
        if !self.connectivity.is_online() {
            self.mark_all_unknown();
            return self.get_overall_health();
        }

        let checks = self
            .services
            .iter()
            .map(|service| self.run_health_check(&service.id));
        for result in join_all(checks).await {
            if let Err(e) = result {
                warn!(error = %e, "🩺 Health check could not run");
            }
        }

        let overall = self.get_overall_health();
        info!(
            status = %overall.status,
            services = overall.services.len(),
            "🩺 Health sweep finished"
        );
        overall
    }

    pub fn get_overall_health(&self) -> OverallHealth {
        let snapshots = self
            .snapshots
            .iter()
            .map(|entry| self.with_live_breaker(entry.value().clone()))
            .collect();
        OverallHealth::aggregate(snapshots, |id| {
            self.services
                .iter()
                .any(|s| s.id == id && s.supports_offline_fallback)
        })
    }

    pub fn service_status(&self, service_id: &str) -> Option<HealthSnapshot> {
        self.snapshots
            .get(service_id)
            .map(|entry| self.with_live_breaker(entry.value().clone()))
    }

    /// Receiver updated after every check
    pub fn subscribe(&self) -> watch::Receiver<OverallHealth> {
        self.overall.subscribe()
    }

    pub fn mark_all_unknown(&self) {
        for service in &self.services {
            self.mark_unknown(&service.id, "device offline");
        }
    }

    /// Run `perform_health_check_all` every `interval`, and immediately when
    /// connectivity comes back
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "🩺 Health monitoring started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut online = monitor.connectivity.subscribe();
            let mut watching = true;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.perform_health_check_all().await;
                    }
                    changed = online.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        let is_online = *online.borrow_and_update();
                        if let Some(publisher) = &monitor.events {
                            publisher.publish(
                                events::HEALTH_CONNECTIVITY_CHANGED,
                                json!({ "online": is_online }),
                            );
                        }
                        if is_online {
                            info!("📶 Connectivity restored, re-checking services");
                            monitor.perform_health_check_all().await;
                        } else {
                            monitor.mark_all_unknown();
                        }
                    }
                }
            }
        })
    }

    fn mark_unknown(&self, service_id: &str, reason: &str) -> HealthSnapshot {
        let breaker_state = self
            .breakers
            .get(service_id)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed);
        let snapshot = HealthSnapshot {
            service_id: service_id.to_string(),
            status: HealthStatus::Unknown,
            last_checked_at: Some(Utc::now()),
            last_latency_ms: None,
            breaker_state,
            message: Some(reason.to_string()),
        };
        self.store(snapshot.clone());
        snapshot
    }

    fn with_live_breaker(&self, mut snapshot: HealthSnapshot) -> HealthSnapshot {
        if let Some(breaker) = self.breakers.get(&snapshot.service_id) {
            snapshot.breaker_state = breaker.state();
        }
        snapshot
    }

    fn store(&self, snapshot: HealthSnapshot) {
        if let Some(publisher) = &self.events {
            publisher.publish(
                events::HEALTH_CHECK_COMPLETED,
                json!({
                    "service_id": snapshot.service_id,
                    "status": snapshot.status,
                    "latency_ms": snapshot.last_latency_ms,
                }),
            );
        }
        self.snapshots.insert(snapshot.service_id.clone(), snapshot);
        self.overall.send_replace(self.get_overall_health());
    }
}
