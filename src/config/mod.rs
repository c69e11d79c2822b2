//! # Gateway Configuration System
//!
//! Typed configuration for the resilience layer: the static list of backend
//! services, the logical endpoint table, and the tuning knobs for health
//! monitoring, retries, caching and workflow retention.
//!
//! ## Architecture
//!
//! - **Single Source of Truth**: everything comes from `gateway-config.yaml`
//! - **Environment Awareness**: `development`/`test`/`production` sections are
//!   deep-merged over the base document
//! - **Explicit Validation**: endpoint options are closed, tagged records checked
//!   at load time rather than interpreted at call time
//!
//! ## Usage
//!
//! ```rust,no_run
//! use diabetactic_gateway::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! for service in &manager.config().services {
//!     println!("{} -> {} ({}ms)", service.id, service.base_url, service.timeout_ms);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::registry::{AuthType, CacheKeyStrategy, HttpMethod, PathTemplate, ResponseTransform};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring gateway-config.yaml
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Backend services, registered once at startup
    pub services: Vec<ServiceDescriptor>,

    /// Logical operation key -> endpoint definition
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub events: EventsConfig,

    /// Environment the configuration was resolved for
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "development".to_string()
}

/// Identity and resilience parameters of one external dependency
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub base_url: String,
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_open_duration_ms: u64,
    #[serde(default)]
    pub cache_default_ttl_ms: u64,
    #[serde(default)]
    pub supports_offline_fallback: bool,
    /// Header carrying service-specific credentials (defaults to `Authorization`)
    #[serde(default)]
    pub auth_header: Option<String>,
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

impl ServiceDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn breaker_open_duration(&self) -> Duration {
        Duration::from_millis(self.breaker_open_duration_ms)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_default_ttl_ms)
    }

    /// Parse `base_url`; only absolute http(s) URLs are accepted
    pub fn parse_base_url(&self) -> Result<Url, String> {
        let url = Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        match url.scheme() {
            "http" | "https" if url.has_host() => Ok(url),
            "http" | "https" => Err("base URL has no host".to_string()),
            other => Err(format!("unsupported scheme '{other}'")),
        }
    }

    /// Join a path onto the service base URL, keeping any base path prefix
    pub fn url_for(&self, path: &str) -> Result<Url, String> {
        let base = self.parse_base_url()?;
        join_path(&base, path)
    }

    pub fn health_url(&self) -> Result<Url, String> {
        self.url_for(&self.health_endpoint)
    }
}

/// Resolve `path` below `base`. Leading slashes are relative to the base path,
/// so `https://host/glucose` + `/readings` gives `https://host/glucose/readings`.
pub fn join_path(base: &Url, path: &str) -> Result<Url, String> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(&format!("./{}", path.trim_start_matches('/')))
        .map_err(|e| e.to_string())
}

/// Endpoint definition as written in configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub service: String,
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub auth: AuthType,
    #[serde(default)]
    pub cache: Option<CachePolicyConfig>,
    #[serde(default)]
    pub transform: ResponseTransform,
    /// Defaults to the method's HTTP idempotency when omitted
    #[serde(default)]
    pub idempotent: Option<bool>,
}

/// Cache options for a cacheable endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CachePolicyConfig {
    /// Falls back to the service's `cache_default_ttl_ms`
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub key: CacheKeyStrategy,
}

/// Health monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    /// A successful check slower than this marks the service Degraded
    pub degraded_latency_ms: u64,
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 30_000,
            degraded_latency_ms: 1_500,
        }
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    pub jitter_max_percentage: f64,
}

impl BackoffConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Exponential delay before retry number `attempt` (1-based), capped at `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);

        let jittered = if self.jitter_enabled && self.jitter_max_percentage > 0.0 {
            let spread = capped * self.jitter_max_percentage.min(1.0);
            capped - spread + fastrand::f64() * spread * 2.0
        } else {
            capped
        };

        Duration::from_millis(jittered.clamp(0.0, self.max_delay_ms as f64) as u64)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            jitter_max_percentage: 0.1,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 512,
        }
    }
}

/// Workflow orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    /// How long finished runs stay queryable
    pub run_retention_seconds: u64,
    pub max_retained_runs: usize,
    /// Base delay between step-level retries
    pub step_retry_delay_ms: u64,
}

impl OrchestrationConfig {
    pub fn run_retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_seconds)
    }

    pub fn step_retry_delay(&self) -> Duration {
        Duration::from_millis(self.step_retry_delay_ms)
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            run_retention_seconds: 300,
            max_retained_runs: 100,
            step_retry_delay_ms: 250,
        }
    }
}

/// Event broadcast configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl GatewayConfig {
    /// Look up a service descriptor by id
    pub fn service(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> ConfigResult<()> {
        if self.services.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "services",
                "at least one service must be configured",
            ));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "services[].id",
                    "service configuration",
                ));
            }
            if !seen.insert(service.id.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "services[].id",
                    service.id.clone(),
                    "service ids must be unique",
                ));
            }
            if service.base_url.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("services.{}.base_url", service.id),
                    "service configuration",
                ));
            }
            service.parse_base_url().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("services.{}.base_url", service.id),
                    service.base_url.clone(),
                    reason,
                )
            })?;
            if service.timeout_ms == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("services.{}.timeout_ms", service.id),
                    "0",
                    "timeout must be greater than 0",
                ));
            }
            if service.breaker_failure_threshold == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("services.{}.breaker_failure_threshold", service.id),
                    "0",
                    "failure threshold must be greater than 0",
                ));
            }
        }

        for (key, endpoint) in &self.endpoints {
            let Some(service) = self.service(&endpoint.service) else {
                return Err(ConfigurationError::UnknownServiceReference {
                    endpoint: key.clone(),
                    service: endpoint.service.clone(),
                });
            };

            PathTemplate::parse(&endpoint.path).map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("endpoints.{key}.path"),
                    endpoint.path.clone(),
                    reason,
                )
            })?;

            if let Some(cache) = &endpoint.cache {
                let ttl = cache.ttl_ms.unwrap_or(service.cache_default_ttl_ms);
                if ttl == 0 {
                    return Err(ConfigurationError::invalid_value(
                        format!("endpoints.{key}.cache.ttl_ms"),
                        "0",
                        "cacheable endpoints need a positive ttl (or a service default)",
                    ));
                }
            }

            if let ResponseTransform::Pointer { pointer } = &endpoint.transform {
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(ConfigurationError::invalid_value(
                        format!("endpoints.{key}.transform.pointer"),
                        pointer.clone(),
                        "JSON pointers must be empty or start with '/'",
                    ));
                }
            }
        }

        if self.backoff.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.backoff_multiplier",
                self.backoff.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Check if running in test environment
    pub fn is_test_environment(&self) -> bool {
        self.environment == "test"
    }
}
