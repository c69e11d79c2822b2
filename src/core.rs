//! # Resilience Core
//!
//! Single bootstrap path that wires every component from one configuration:
//! breakers, cache, endpoint registry, gateway, health monitor and
//! orchestrator, all sharing one event publisher. It also exposes the
//! observer-facing operations used by UI layers.

use crate::auth::{AuthProvider, StaticTokenProvider};
use crate::cache::ResponseCache;
use crate::config::ConfigManager;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::gateway::{ApiGateway, GatewayError, GatewayRequest, GatewayResponse};
use crate::health::{HealthMonitor, OverallHealth};
use crate::orchestration::workflows;
use crate::orchestration::{ServiceOrchestrator, WorkflowRun};
use crate::registry::EndpointRegistry;
use crate::resilience::{CircuitBreakerManager, CircuitBreakerState, Clock, SystemClock};
use crate::transport::{HttpTransport, NetworkTransport};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// External collaborators the core talks to. Anything left unset falls back to
/// a production default: reqwest transport, in-memory tokens, always online,
/// wall clock.
#[derive(Debug, Default)]
pub struct Collaborators {
    pub transport: Option<Arc<dyn NetworkTransport>>,
    pub fallback_transport: Option<Arc<dyn NetworkTransport>>,
    pub auth: Option<Arc<dyn AuthProvider>>,
    pub connectivity: Option<Arc<dyn Connectivity>>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: Arc<dyn NetworkTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn fallback_transport(mut self, transport: Arc<dyn NetworkTransport>) -> Self {
        self.fallback_transport = Some(transport);
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

#[derive(Debug)]
pub struct ResilienceCore {
    config_manager: Arc<ConfigManager>,
    events: EventPublisher,
    breakers: Arc<CircuitBreakerManager>,
    gateway: Arc<ApiGateway>,
    health: Arc<HealthMonitor>,
    orchestrator: Arc<ServiceOrchestrator>,
}

impl ResilienceCore {
    /// Bootstrap with auto-detected environment configuration and default
    /// collaborators
    pub fn new() -> Result<Self> {
        info!("🔧 Initializing ResilienceCore with auto-detected environment configuration");
        let config_manager = ConfigManager::load()?;
        Self::from_config(config_manager, Collaborators::new())
    }

    pub fn from_config(
        config_manager: Arc<ConfigManager>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let config = config_manager.config();

        let transport: Arc<dyn NetworkTransport> = match collaborators.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let auth: Arc<dyn AuthProvider> = collaborators
            .auth
            .unwrap_or_else(|| Arc::new(StaticTokenProvider::new()));
        let connectivity: Arc<dyn Connectivity> = collaborators
            .connectivity
            .unwrap_or_else(|| Arc::new(ConnectivityMonitor::default()));
        let clock: Arc<dyn Clock> = collaborators
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock));

        let events = EventPublisher::from_config(&config.events);
        let registry = Arc::new(EndpointRegistry::from_config(config)?);
        let breakers = Arc::new(CircuitBreakerManager::new(
            &config.services,
            Arc::clone(&clock),
            Some(events.clone()),
        ));
        let cache = Arc::new(ResponseCache::new(&config.cache, Arc::clone(&clock)));

        let mut gateway = ApiGateway::new(
            registry,
            Arc::clone(&breakers),
            cache,
            Arc::clone(&transport),
            auth,
            Arc::clone(&connectivity),
            config.backoff.clone(),
        )
        .with_events(events.clone());
        if let Some(fallback) = collaborators.fallback_transport {
            gateway = gateway.with_fallback_transport(fallback);
        }
        let gateway = Arc::new(gateway);

        let health = Arc::new(
            HealthMonitor::new(
                config.services.clone(),
                Arc::clone(&breakers),
                transport,
                connectivity,
                config.health.clone(),
            )
            .with_events(events.clone()),
        );

        let orchestrator = ServiceOrchestrator::new(
            Arc::clone(&gateway),
            Arc::clone(&health),
            config.orchestration.clone(),
            &config.backoff,
        )
        .with_events(events.clone());

        // Configurations without the appointment endpoints simply lack the workflow
        if let Err(e) = orchestrator.register_workflow(workflows::appointment_booking()) {
            debug!(error = %e, "Built-in appointment workflow not registered");
        }

        info!(
            environment = %config_manager.environment(),
            services = config.services.len(),
            endpoints = gateway.registry().len(),
            "✅ ResilienceCore initialized"
        );

        Ok(Self {
            config_manager,
            events,
            breakers,
            gateway,
            health,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn gateway(&self) -> &Arc<ApiGateway> {
        &self.gateway
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn orchestrator(&self) -> &Arc<ServiceOrchestrator> {
        &self.orchestrator
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub async fn request(
        &self,
        endpoint: &str,
        request: GatewayRequest,
    ) -> std::result::Result<GatewayResponse, GatewayError> {
        self.gateway.request(endpoint, request).await
    }

    /// Run a registered workflow to completion
    pub async fn execute_workflow(&self, name: &str, input: Value) -> Result<WorkflowRun> {
        self.orchestrator.execute_named(name, input).await
    }

    /// Start a registered workflow in the background
    pub fn start_workflow(&self, name: &str, input: Value) -> Result<Uuid> {
        self.orchestrator.start_named(name, input)
    }

    pub fn cancel_workflow(&self, run_id: Uuid) -> Result<bool> {
        self.orchestrator.cancel(run_id)
    }

    /// Observe a run as it progresses
    pub fn get_active_workflow(&self, run_id: Uuid) -> Result<watch::Receiver<WorkflowRun>> {
        self.orchestrator.watch_run(run_id)
    }

    pub fn get_overall_health(&self) -> OverallHealth {
        self.health.get_overall_health()
    }

    pub fn get_circuit_breaker_state(&self, service_id: &str) -> Result<CircuitBreakerState> {
        self.breakers.get_state(service_id)
    }

    /// Operator override: close a service's breaker
    pub fn reset_circuit_breaker(&self, service_id: &str) -> Result<()> {
        info!(service_id = %service_id, "🔧 Manual circuit breaker reset");
        self.breakers.reset(service_id)
    }

    pub fn clear_cache(&self, service_id: Option<&str>) -> usize {
        self.gateway.clear_cache(service_id)
    }

    /// Start periodic probing at the configured interval, unless health
    /// monitoring is disabled
    pub fn start_health_monitoring(&self) -> Option<JoinHandle<()>> {
        let health = &self.config_manager.config().health;
        if !health.enabled {
            info!("🩺 Health monitoring disabled by configuration");
            return None;
        }
        Some(self.health.start_monitoring(health.check_interval()))
    }
}
