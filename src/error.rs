use crate::config::ConfigurationError;
use crate::gateway::GatewayError;
use crate::transport::NetworkError;
use thiserror::Error;
use uuid::Uuid;

/// Crate-level error for lookups, configuration and state bookkeeping.
///
/// Request outcomes never surface here directly: callers of the gateway get a
/// normalized [`GatewayError`], which this type only wraps when a higher-level
/// operation needs a single error type.
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Unknown workflow run: {0}")]
    UnknownRun(Uuid),

    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Workflow definition error: {0}")]
    InvalidWorkflow(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Transport setup failed: {0}")]
    Transport(#[from] NetworkError),
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
