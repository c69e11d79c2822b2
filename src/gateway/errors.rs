//! Normalized gateway error shape.
//!
//! Every terminal failure leaves the gateway as a [`GatewayError`], whatever the
//! originating service's error format was.

use crate::transport::NetworkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    /// Unreachable, timed out or offline
    Network,
    /// 5xx
    ServerError,
    /// 4xx other than 401/429
    ClientError,
    Unauthenticated,
    RateLimited,
    /// The breaker refused the call before any network attempt
    CircuitOpen,
    UnknownEndpoint,
    ConfigurationError,
    Cancelled,
}

impl GatewayErrorCode {
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, Self::Network | Self::ServerError | Self::RateLimited)
    }
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Unauthenticated => "unauthenticated",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::UnknownEndpoint => "unknown_endpoint",
            Self::ConfigurationError => "configuration_error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub message: String,
    pub service_id: Option<String>,
    pub endpoint: Option<String>,
    /// Server-provided wait hint for rate-limited responses
    pub retry_after_ms: Option<u64>,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            http_status: None,
            retryable: code.is_retryable_by_default(),
            message: message.into(),
            service_id: None,
            endpoint: None,
            retry_after_ms: None,
        }
    }

    pub fn unknown_endpoint(key: &str) -> Self {
        Self::new(
            GatewayErrorCode::UnknownEndpoint,
            format!("unknown endpoint '{key}'"),
        )
        .with_endpoint(key)
    }

    pub fn configuration(endpoint: &str, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::ConfigurationError, message).with_endpoint(endpoint)
    }

    pub fn circuit_open(service_id: &str) -> Self {
        Self::new(
            GatewayErrorCode::CircuitOpen,
            format!("circuit breaker for '{service_id}' is open"),
        )
        .with_service(service_id)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Unauthenticated, message)
    }

    pub fn cancelled() -> Self {
        Self::new(GatewayErrorCode::Cancelled, "request cancelled by caller")
    }

    pub fn network(error: &NetworkError) -> Self {
        let mut err = Self::new(GatewayErrorCode::Network, error.to_string());
        // Offline stays non-retryable until connectivity returns
        if matches!(error, NetworkError::Offline) {
            err.retryable = false;
        }
        err
    }

    /// Build from a non-success HTTP response
    pub fn from_response(code: GatewayErrorCode, status: u16, body: &Value) -> Self {
        let message = extract_message(body).unwrap_or_else(|| format!("HTTP {status}"));
        Self::new(code, message).with_status(status)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code)?;
        if let Some(status) = self.http_status {
            write!(f, " HTTP {status}")?;
        }
        if let Some(endpoint) = &self.endpoint {
            write!(f, " {endpoint}")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for GatewayError {}

/// Pull a human readable message out of the error bodies our backends produce
fn extract_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => ["detail", "message", "error", "reason"]
            .iter()
            .find_map(|field| match map.get(*field) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(items)) if !items.is_empty() => {
                    // Validation errors arrive as a list of {msg, loc}
                    let parts: Vec<String> = items
                        .iter()
                        .filter_map(|item| {
                            item.get("msg")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .or_else(|| item.as_str().map(str::to_string))
                        })
                        .collect();
                    (!parts.is_empty()).then(|| parts.join("; "))
                }
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            }),
        _ => None,
    }
}
