//! # Network Transport
//!
//! The gateway's only path to the network. Production code uses the reqwest
//! backed [`HttpTransport`]; tests and offline fallback plug in other
//! implementations such as the scripted [`FixtureTransport`].

pub mod fixture;
pub mod http;

use crate::registry::HttpMethod;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

pub use fixture::{FixtureOutcome, FixtureTransport};
pub use http::HttpTransport;

/// One outbound call
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Raw response; header names are lower-cased
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures below the HTTP layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("device is offline")]
    Offline,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait NetworkTransport: Send + Sync + Debug {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, NetworkError>;
}
