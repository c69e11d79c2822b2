//! Health status values and their aggregation.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Reachable but slow or answering unexpectedly
    Degraded,
    Unhealthy,
    /// Not checked yet, or the device is offline
    Unknown,
}

impl HealthStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Latest check result for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub service_id: String,
    pub status: HealthStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub breaker_state: CircuitState,
    pub message: Option<String>,
}

impl HealthSnapshot {
    pub fn unknown(service_id: impl Into<String>, breaker_state: CircuitState) -> Self {
        Self {
            service_id: service_id.into(),
            status: HealthStatus::Unknown,
            last_checked_at: None,
            last_latency_ms: None,
            breaker_state,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallHealth {
    pub status: HealthStatus,
    pub services: Vec<HealthSnapshot>,
    pub checked_at: DateTime<Utc>,
}

impl OverallHealth {
    /// Aggregate per-service snapshots.
    ///
    /// Healthy only if every service is; Unhealthy if an Unhealthy service has
    /// no offline fallback; Unknown if nothing is known; Degraded otherwise.
    pub fn aggregate(
        mut services: Vec<HealthSnapshot>,
        has_offline_fallback: impl Fn(&str) -> bool,
    ) -> Self {
        services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        let status = if services.is_empty()
            || services.iter().all(|s| s.status == HealthStatus::Unknown)
        {
            HealthStatus::Unknown
        } else if services.iter().all(|s| s.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if services
            .iter()
            .any(|s| s.status == HealthStatus::Unhealthy && !has_offline_fallback(&s.service_id))
        {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            services,
            checked_at: Utc::now(),
        }
    }

    pub fn service(&self, service_id: &str) -> Option<&HealthSnapshot> {
        self.services.iter().find(|s| s.service_id == service_id)
    }
}
