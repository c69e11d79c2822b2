//! Deterministic scripted transport for tests and offline fallback.

use super::{NetworkError, NetworkTransport, TransportRequest, TransportResponse};
use crate::registry::HttpMethod;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum FixtureOutcome {
    Respond(TransportResponse),
    Fail(NetworkError),
    /// Never answers; the caller's timeout fires
    Hang,
}

#[derive(Debug, Default)]
struct Route {
    outcomes: VecDeque<FixtureOutcome>,
    last: Option<FixtureOutcome>,
    delay: Duration,
}

impl Route {
    /// Scripted outcomes are consumed in order; the final one repeats
    fn next(&mut self) -> Option<FixtureOutcome> {
        if let Some(outcome) = self.outcomes.pop_front() {
            self.last = Some(outcome.clone());
            return Some(outcome);
        }
        self.last.clone()
    }
}

/// Routes keyed by `"METHOD url"`, every request recorded
#[derive(Debug, Default)]
pub struct FixtureTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<TransportRequest>>,
}

fn route_key(method: HttpMethod, url: &str) -> String {
    format!("{method} {url}")
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, method: HttpMethod, url: &str, outcome: FixtureOutcome) -> &Self {
        self.routes
            .lock()
            .entry(route_key(method, url))
            .or_default()
            .outcomes
            .push_back(outcome);
        self
    }

    pub fn respond(&self, method: HttpMethod, url: &str, status: u16, body: Value) -> &Self {
        self.push(
            method,
            url,
            FixtureOutcome::Respond(TransportResponse::new(status, body)),
        )
    }

    pub fn respond_with(&self, method: HttpMethod, url: &str, response: TransportResponse) -> &Self {
        self.push(method, url, FixtureOutcome::Respond(response))
    }

    pub fn fail(&self, method: HttpMethod, url: &str, error: NetworkError) -> &Self {
        self.push(method, url, FixtureOutcome::Fail(error))
    }

    pub fn hang(&self, method: HttpMethod, url: &str) -> &Self {
        self.push(method, url, FixtureOutcome::Hang)
    }

    /// Delay every answer on a route
    pub fn delay(&self, method: HttpMethod, url: &str, delay: Duration) -> &Self {
        self.routes
            .lock()
            .entry(route_key(method, url))
            .or_default()
            .delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self, method: HttpMethod, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl NetworkTransport for FixtureTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, NetworkError> {
        self.requests.lock().push(request.clone());

        let (outcome, delay) = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&route_key(request.method, &request.url)) {
                Some(route) => (route.next(), route.delay),
                None => (None, Duration::ZERO),
            }
        };

        let Some(outcome) = outcome else {
            return Err(NetworkError::Unreachable(format!(
                "no fixture for {} {}",
                request.method, request.url
            )));
        };

        let hangs = matches!(outcome, FixtureOutcome::Hang);
        if hangs || delay >= request.timeout {
            tokio::time::sleep(request.timeout).await;
            return Err(NetworkError::Timeout(request.timeout));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            FixtureOutcome::Respond(response) => Ok(response),
            FixtureOutcome::Fail(error) => Err(error),
            FixtureOutcome::Hang => Err(NetworkError::Timeout(request.timeout)),
        }
    }
}
