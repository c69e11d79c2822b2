//! Shared fixtures for integration tests: an in-memory configuration and a
//! fully wired [`ResilienceCore`] over scripted collaborators.

#![allow(dead_code)]

use diabetactic_gateway::auth::StaticTokenProvider;
use diabetactic_gateway::config::{ConfigManager, GatewayConfig};
use diabetactic_gateway::connectivity::{Connectivity, ConnectivityMonitor};
use diabetactic_gateway::core::{Collaborators, ResilienceCore};
use diabetactic_gateway::registry::AuthType;
use diabetactic_gateway::resilience::{Clock, ManualClock};
use diabetactic_gateway::transport::{FixtureTransport, NetworkTransport};
use std::sync::Arc;

pub const GLUCOSE: &str = "http://glucose.test";
pub const APPOINTMENTS: &str = "http://appointments.test";
pub const TIDEPOOL: &str = "https://tidepool.test";

pub const PATIENT_TOKEN: &str = "patient-token";
pub const TIDEPOOL_SESSION: &str = "tidepool-session";

pub const TEST_CONFIG: &str = r#"
services:
  - id: glucoserver
    base_url: http://glucose.test
    timeout_ms: 1000
    max_retries: 2
    breaker_failure_threshold: 3
    breaker_open_duration_ms: 10000
    cache_default_ttl_ms: 60000
  - id: appointments
    base_url: http://appointments.test
    timeout_ms: 1000
    max_retries: 2
    breaker_failure_threshold: 3
    breaker_open_duration_ms: 10000
  - id: tidepool
    base_url: https://tidepool.test
    health_endpoint: /status
    timeout_ms: 2000
    max_retries: 1
    breaker_failure_threshold: 5
    breaker_open_duration_ms: 60000
    cache_default_ttl_ms: 300000
    supports_offline_fallback: true
    auth_header: X-Tidepool-Session-Token

endpoints:
  glucose.mine:
    service: glucoserver
    path: /glucose/mine
    auth: bearer
    cache: {}
  glucose.first:
    service: glucoserver
    path: /glucose/mine
    auth: bearer
    cache: {}
    transform:
      type: pointer
      pointer: /0
  glucose.latest:
    service: glucoserver
    path: /glucose/mine/latest
    auth: bearer
  glucose.create:
    service: glucoserver
    path: /glucose/create
    method: POST
    auth: bearer
  appointments.mine:
    service: appointments
    path: /appointments/mine
    auth: bearer
  appointments.create:
    service: appointments
    path: /appointments/create
    method: POST
    auth: bearer
  appointments.submit:
    service: appointments
    path: /appointments/submit
    method: POST
    auth: bearer
  appointments.cancel:
    service: appointments
    path: /appointments/{appointment_id}
    method: DELETE
    auth: bearer
  appointments.withdraw:
    service: appointments
    path: /appointments/submit
    method: DELETE
    auth: bearer
  tidepool.readings:
    service: tidepool
    path: /data/{user_id}
    auth: service_specific
    transform:
      type: tidepool_readings

health:
  enabled: false
  check_interval_ms: 1000
  degraded_latency_ms: 2000

backoff:
  base_delay_ms: 1
  max_delay_ms: 10
  backoff_multiplier: 2.0
  jitter_enabled: false
  jitter_max_percentage: 0.0

cache:
  enabled: true
  max_entries: 100

orchestration:
  run_retention_seconds: 300
  max_retained_runs: 100
  step_retry_delay_ms: 1

environment: test
"#;

pub fn test_config() -> GatewayConfig {
    serde_yaml::from_str(TEST_CONFIG).expect("test configuration parses")
}

/// A core wired to scripted collaborators, with handles to drive them
pub struct TestHarness {
    pub core: ResilienceCore,
    pub transport: Arc<FixtureTransport>,
    pub fallback: Arc<FixtureTransport>,
    pub auth: Arc<StaticTokenProvider>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::with_parts(
            config,
            StaticTokenProvider::new()
                .with_token(AuthType::Bearer, PATIENT_TOKEN)
                .with_token(AuthType::ServiceSpecific, TIDEPOOL_SESSION),
        )
    }

    pub fn with_auth(auth: StaticTokenProvider) -> Self {
        Self::with_parts(test_config(), auth)
    }

    pub fn with_parts(config: GatewayConfig, auth: StaticTokenProvider) -> Self {
        let transport = Arc::new(FixtureTransport::new());
        let fallback = Arc::new(FixtureTransport::new());
        let auth = Arc::new(auth);
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let clock = Arc::new(ManualClock::new());

        let manager = ConfigManager::from_config(config).expect("test configuration is valid");
        let collaborators = Collaborators::new()
            .transport(transport.clone() as Arc<dyn NetworkTransport>)
            .fallback_transport(fallback.clone() as Arc<dyn NetworkTransport>)
            .auth(auth.clone())
            .connectivity(connectivity.clone() as Arc<dyn Connectivity>)
            .clock(clock.clone() as Arc<dyn Clock>);
        let core = ResilienceCore::from_config(manager, collaborators).expect("core bootstraps");

        Self {
            core,
            transport,
            fallback,
            auth,
            connectivity,
            clock,
        }
    }

    pub fn consecutive_failures(&self, service_id: &str) -> u32 {
        self.core
            .get_circuit_breaker_state(service_id)
            .expect("service is registered")
            .consecutive_failures
    }
}

pub fn url(base: &str, path: &str) -> String {
    format!("{base}{path}")
}
