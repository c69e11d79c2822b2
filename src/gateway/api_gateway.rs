//! # API Gateway
//!
//! Single entry point for logical requests such as `"glucose.create"`. A call is
//! resolved through the [`EndpointRegistry`], gated by the service's breaker,
//! served from the [`ResponseCache`] when possible, coalesced with identical
//! in-flight calls, authenticated, sent with the service timeout, classified and
//! finally normalized into a [`GatewayResponse`] or [`GatewayError`].

use super::classifier::{classify, OutcomeClass};
use super::errors::{GatewayError, GatewayErrorCode};
use super::inflight::{Flight, InFlightRequests};
use crate::auth::{AuthProvider, Token};
use crate::cache::ResponseCache;
use crate::config::{BackoffConfig, ServiceDescriptor};
use crate::connectivity::Connectivity;
use crate::constants::{events, headers};
use crate::events::EventPublisher;
use crate::logging::log_gateway_request;
use crate::registry::{
    AuthType, EndpointDefinition, EndpointRegistry, RequestParams, ResolvedRequest,
};
use crate::resilience::{CircuitBreaker, CircuitBreakerManager};
use crate::transport::{NetworkError, NetworkTransport, TransportRequest};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Parameters and body of one logical request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayRequest {
    pub params: RequestParams,
    pub body: Option<Value>,
}

impl GatewayRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub endpoint: String,
    pub service_id: String,
    /// HTTP status of the call that produced the data (200 for cache hits)
    pub status: u16,
    pub data: Value,
    pub from_cache: bool,
}

type GatewayResult = Result<GatewayResponse, GatewayError>;

/// Settles a claimed breaker permit exactly once; an unsettled permit (the
/// caller was cancelled, or the outcome says nothing about health) gives back
/// any HalfOpen trial it holds.
struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}

#[derive(Debug)]
pub struct ApiGateway {
    registry: Arc<EndpointRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    cache: Arc<ResponseCache>,
    transport: Arc<dyn NetworkTransport>,
    fallback: Option<Arc<dyn NetworkTransport>>,
    auth: Arc<dyn AuthProvider>,
    connectivity: Arc<dyn Connectivity>,
    backoff: BackoffConfig,
    events: Option<EventPublisher>,
    inflight: InFlightRequests<GatewayResult>,
}

impl ApiGateway {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        cache: Arc<ResponseCache>,
        transport: Arc<dyn NetworkTransport>,
        auth: Arc<dyn AuthProvider>,
        connectivity: Arc<dyn Connectivity>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            cache,
            transport,
            fallback: None,
            auth,
            connectivity,
            backoff,
            events: None,
            inflight: InFlightRequests::new(),
        }
    }

    /// Transport used for services with offline fallback while the device is offline
    pub fn with_fallback_transport(mut self, fallback: Arc<dyn NetworkTransport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Clear cached responses for one service, or all of them
    pub fn clear_cache(&self, service_id: Option<&str>) -> usize {
        match service_id {
            Some(id) => self.cache.clear_service(id),
            None => self.cache.clear_all(),
        }
    }

    /// Number of distinct calls currently on the wire
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Perform a logical request
    pub async fn request(&self, key: &str, request: GatewayRequest) -> GatewayResult {
        let result = self.dispatch(key, &request).await;
        if let Err(error) = &result {
            self.report_failure(key, error);
        }
        result
    }

    /// Perform a logical request that ends early with `Cancelled` once `cancel`
    /// completes. The network call is dropped with it.
    pub async fn request_with_cancel<C>(
        &self,
        key: &str,
        request: GatewayRequest,
        cancel: C,
    ) -> GatewayResult
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.request(key, request) => result,
            _ = cancel => {
                debug!(endpoint = %key, "🛑 Gateway request cancelled by caller");
                Err(GatewayError::cancelled().with_endpoint(key))
            }
        }
    }

    async fn dispatch(&self, key: &str, request: &GatewayRequest) -> GatewayResult {
        let (endpoint, service, resolved) = self.registry.resolve(key, request)?;
        let breaker = self.breakers.get(&service.id).ok_or_else(|| {
            GatewayError::configuration(key, format!("no circuit breaker for '{}'", service.id))
        })?;

        if !breaker.peek() {
            return Err(GatewayError::circuit_open(&service.id).with_endpoint(key));
        }

        if let Some(hit) = self.cached_response(&service.id, &resolved) {
            return Ok(hit);
        }

        self.coalesce(endpoint, service, &breaker, &resolved, request)
            .await
    }

    /// Join an identical in-flight call, or lead a new one
    async fn coalesce(
        &self,
        endpoint: &EndpointDefinition,
        service: &ServiceDescriptor,
        breaker: &CircuitBreaker,
        resolved: &ResolvedRequest,
        request: &GatewayRequest,
    ) -> GatewayResult {
        loop {
            match self.inflight.join(&resolved.flight_key) {
                Flight::Leader(leader) => {
                    // A leader that finished after our cache miss may have stored the response
                    let result = match self.cached_response(&service.id, resolved) {
                        Some(hit) => Ok(hit),
                        None => self.execute(endpoint, service, breaker, resolved, request).await,
                    };
                    leader.complete(result.clone());
                    return result;
                }
                Flight::Follower(receiver) => {
                    debug!(endpoint = %resolved.endpoint_key, "🔗 Joining in-flight request");
                    if let Some(result) = InFlightRequests::follow(receiver).await {
                        return result;
                    }
                    // The leader was cancelled before finishing; issue a fresh call
                }
            }
        }
    }

    fn cached_response(&self, service_id: &str, resolved: &ResolvedRequest) -> Option<GatewayResponse> {
        let cache_key = resolved.cache_key.as_ref()?;
        let data = self.cache.get(cache_key)?;
        debug!(endpoint = %resolved.endpoint_key, cache_key = %cache_key, "💾 Cache hit");
        Some(GatewayResponse {
            endpoint: resolved.endpoint_key.clone(),
            service_id: service_id.to_string(),
            status: 200,
            data,
            from_cache: true,
        })
    }

    async fn execute(
        &self,
        endpoint: &EndpointDefinition,
        service: &ServiceDescriptor,
        breaker: &CircuitBreaker,
        resolved: &ResolvedRequest,
        request: &GatewayRequest,
    ) -> GatewayResult {
        let key = resolved.endpoint_key.as_str();
        let mut token = self.initial_token(endpoint.auth, key).await?;
        let mut refreshed = false;
        let mut retries = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let transport = self.select_transport(service).ok_or_else(|| {
                GatewayError::network(&NetworkError::Offline)
                    .with_service(&service.id)
                    .with_endpoint(key)
            })?;

            if !breaker.allow_request() {
                return Err(GatewayError::circuit_open(&service.id).with_endpoint(key));
            }
            let permit = BreakerPermit::new(breaker);

            let outbound = TransportRequest {
                method: endpoint.method,
                url: resolved.url.clone(),
                headers: self.build_headers(endpoint, service, token.as_ref(), request),
                body: request.body.clone(),
                timeout: service.timeout(),
            };

            let started = Instant::now();
            let outcome = match tokio::time::timeout(service.timeout(), transport.send(outbound)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(NetworkError::Timeout(service.timeout())),
            };
            let class = classify(&outcome, Utc::now());

            log_gateway_request(
                key,
                &service.id,
                endpoint.method.as_str(),
                &match &outcome {
                    Ok(response) => response.status.to_string(),
                    Err(e) => e.to_string(),
                },
                attempt,
                started.elapsed(),
            );

            let outcome = match outcome {
                Ok(response) if class == OutcomeClass::Success => {
                    permit.success();
                    return self.finish_success(endpoint, service, resolved, response.status, response.body);
                }
                other => other,
            };

            if class.counts_toward_breaker() {
                permit.failure();
            } else {
                drop(permit);
            }

            let code = class.error_code().unwrap_or(GatewayErrorCode::ServerError);
            let mut error = match outcome {
                Ok(response) => GatewayError::from_response(code, response.status, &response.body),
                Err(e) => GatewayError::new(code, e.to_string()),
            };
            if class == OutcomeClass::Offline {
                error = error.non_retryable();
            }

            match &class {
                OutcomeClass::Unauthenticated if !refreshed && endpoint.auth != AuthType::None => {
                    refreshed = true;
                    token = Some(self.auth.refresh_token(endpoint.auth).await.map_err(|e| {
                        GatewayError::unauthenticated(e.to_string())
                            .with_status(401)
                            .with_service(&service.id)
                            .with_endpoint(key)
                    })?);
                    debug!(endpoint = %key, "🔑 Token refreshed, retrying once");
                    continue;
                }
                OutcomeClass::RateLimited { retry_after } => {
                    if let Some(delay) = retry_after {
                        error = error.with_retry_after(*delay);
                    }
                    if retries < service.max_retries {
                        retries += 1;
                        let delay = retry_after
                            .map(|d| d.min(self.backoff.max_delay()))
                            .unwrap_or_else(|| self.backoff.delay_for_attempt(retries));
                        debug!(endpoint = %key, delay_ms = delay.as_millis() as u64, "⏳ Rate limited, backing off");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
                _ if class.is_retryable(endpoint.idempotent)
                    && retries < service.max_retries
                    && breaker.peek() =>
                {
                    retries += 1;
                    let delay = self.backoff.delay_for_attempt(retries);
                    debug!(
                        endpoint = %key,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "🔁 Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                _ => {}
            }

            return Err(error.with_service(&service.id).with_endpoint(key));
        }
    }

    async fn initial_token(&self, auth: AuthType, key: &str) -> Result<Option<Token>, GatewayError> {
        if auth == AuthType::None {
            return Ok(None);
        }
        match self.auth.get_token(auth).await {
            Some(token) => Ok(Some(token)),
            None => Err(GatewayError::unauthenticated(format!("no {auth} token available"))
                .with_endpoint(key)),
        }
    }

    fn select_transport(&self, service: &ServiceDescriptor) -> Option<&Arc<dyn NetworkTransport>> {
        if self.connectivity.is_online() {
            return Some(&self.transport);
        }
        if service.supports_offline_fallback {
            return self.fallback.as_ref();
        }
        None
    }

    fn build_headers(
        &self,
        endpoint: &EndpointDefinition,
        service: &ServiceDescriptor,
        token: Option<&Token>,
        request: &GatewayRequest,
    ) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert("Accept".to_string(), "application/json".to_string());
        if request.body.is_some() {
            out.insert(headers::CONTENT_TYPE.to_string(), "application/json".to_string());
        }

        if let Some(token) = token {
            match endpoint.auth {
                AuthType::None => {}
                AuthType::Bearer => {
                    out.insert(
                        headers::AUTHORIZATION.to_string(),
                        format!("Bearer {}", token.as_str()),
                    );
                }
                AuthType::ServiceSpecific => {
                    let header = service
                        .auth_header
                        .clone()
                        .unwrap_or_else(|| headers::AUTHORIZATION.to_string());
                    out.insert(header, token.as_str().to_string());
                }
            }
        }
        out
    }

    fn finish_success(
        &self,
        endpoint: &EndpointDefinition,
        service: &ServiceDescriptor,
        resolved: &ResolvedRequest,
        status: u16,
        body: Value,
    ) -> GatewayResult {
        let data = endpoint.transform.apply(body).map_err(|reason| {
            GatewayError::new(
                GatewayErrorCode::ServerError,
                format!("unexpected response shape: {reason}"),
            )
            .non_retryable()
            .with_status(status)
            .with_service(&service.id)
            .with_endpoint(&endpoint.key)
        })?;

        if let (Some(policy), Some(cache_key)) = (&endpoint.cache, &resolved.cache_key) {
            self.cache
                .insert(cache_key.clone(), &service.id, data.clone(), policy.ttl);
        }

        Ok(GatewayResponse {
            endpoint: endpoint.key.clone(),
            service_id: service.id.clone(),
            status,
            data,
            from_cache: false,
        })
    }

    fn report_failure(&self, key: &str, error: &GatewayError) {
        warn!(
            endpoint = %key,
            code = %error.code,
            http_status = error.http_status,
            retryable = error.retryable,
            "❌ Gateway request failed: {}",
            error.message
        );
        if let Some(publisher) = &self.events {
            publisher.publish(
                events::GATEWAY_REQUEST_FAILED,
                json!({ "endpoint": key, "error": error }),
            );
        }
    }
}
