//! # Health Monitoring
//!
//! Periodic liveness probing of every registered service, per-service
//! snapshots, and the aggregated [`OverallHealth`] view.

pub mod monitor;
pub mod types;

pub use monitor::HealthMonitor;
pub use types::{HealthSnapshot, HealthStatus, OverallHealth};
