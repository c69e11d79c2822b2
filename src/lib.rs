#![allow(clippy::doc_markdown)] // Allow technical terms like Tidepool, mmol/L in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Diabetactic Gateway
//!
//! Resilience and orchestration layer between the Diabetactic client and the
//! backend services it depends on: the Tidepool glucose provider, the local
//! glucose reading service, appointment scheduling and authentication.
//!
//! ## Overview
//!
//! Every backend call goes through one [`gateway::ApiGateway`], which resolves
//! a logical endpoint key such as `"glucose.create"` into a concrete HTTP call,
//! protects each service with its own circuit breaker, caches responses,
//! coalesces identical concurrent calls and normalizes every failure into a
//! single [`gateway::GatewayError`] shape. A [`health::HealthMonitor`] checks
//! services independently of user traffic, and the
//! [`orchestration::ServiceOrchestrator`] runs multi-service workflows as sagas
//! with compensating rollback.
//!
//! ## Module Organization
//!
//! - [`cache`] - TTL response cache
//! - [`resilience`] - Per-service circuit breakers
//! - [`health`] - Service health checking and aggregation
//! - [`registry`] - Endpoint registry and response transforms
//! - [`gateway`] - The API gateway, error classification and normalization
//! - [`orchestration`] - Saga workflow orchestrator
//! - [`transport`], [`auth`], [`connectivity`] - External collaborators
//! - [`config`] - YAML configuration with environment overrides
//! - [`events`] - Lifecycle event broadcasting
//! - [`core`] - Bootstrap wiring every component together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diabetactic_gateway::config::ConfigManager;
//! use diabetactic_gateway::core::{Collaborators, ResilienceCore};
//! use diabetactic_gateway::gateway::GatewayRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! diabetactic_gateway::logging::init_structured_logging();
//!
//! let config = ConfigManager::load()?;
//! let core = ResilienceCore::from_config(config, Collaborators::new())?;
//! let _monitor = core.start_health_monitoring();
//!
//! let readings = core
//!     .request("glucose.mine", GatewayRequest::new().param("limit", 20))
//!     .await?;
//! println!("{} (from cache: {})", readings.data, readings.from_cache);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod core;
pub mod error;
pub mod events;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod transport;

pub use config::{ConfigManager, GatewayConfig, ServiceDescriptor};
pub use core::{Collaborators, ResilienceCore};
pub use error::{ResilienceError, Result};
pub use gateway::{ApiGateway, GatewayError, GatewayErrorCode, GatewayRequest, GatewayResponse};
pub use health::{HealthMonitor, HealthStatus, OverallHealth};
pub use orchestration::{ServiceOrchestrator, WorkflowDefinition, WorkflowRun, WorkflowStatus};
pub use resilience::{CircuitBreakerManager, CircuitState};
