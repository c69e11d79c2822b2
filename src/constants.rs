//! # System Constants
//!
//! Service identifiers, event names and protocol constants shared by the
//! gateway, health monitor and orchestrator.

/// Identifiers of the backend services the mobile client depends on
pub mod services {
    /// External OAuth-based glucose data provider
    pub const TIDEPOOL: &str = "tidepool";
    /// Local glucose reading service
    pub const GLUCOSE: &str = "glucoserver";
    /// Appointment scheduling and review queue
    pub const APPOINTMENTS: &str = "appointments";
    /// Local authentication service
    pub const AUTH: &str = "login";
}

/// Event names broadcast through the [`crate::events::EventPublisher`]
pub mod events {
    // Circuit breaker lifecycle
    pub const CIRCUIT_BREAKER_STATE_CHANGED: &str = "circuit_breaker.state_changed";
    pub const CIRCUIT_BREAKER_RESET: &str = "circuit_breaker.reset";

    // Health monitoring
    pub const HEALTH_CHECK_COMPLETED: &str = "health.check_completed";
    pub const HEALTH_CONNECTIVITY_CHANGED: &str = "health.connectivity_changed";

    // Gateway
    pub const GATEWAY_REQUEST_FAILED: &str = "gateway.request_failed";

    // Workflow orchestration
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_STEP_COMPLETED: &str = "workflow.step_completed";
    pub const WORKFLOW_STEP_FAILED: &str = "workflow.step_failed";
    pub const WORKFLOW_COMPENSATING: &str = "workflow.compensating";
    pub const WORKFLOW_FINISHED: &str = "workflow.finished";
}

/// HTTP header names used by the gateway
pub mod headers {
    pub const AUTHORIZATION: &str = "Authorization";
    pub const RETRY_AFTER: &str = "retry-after";
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// Multiplier converting Tidepool's mmol/L glucose values into mg/dL
pub const MMOL_TO_MG_DL: f64 = 18.01559;

/// Configuration file names searched in the configuration directory
pub const CONFIG_FILE_NAMES: [&str; 2] = ["gateway-config.yaml", "gateway-config.yml"];
