//! Endpoint definitions and resolution of logical keys into concrete requests.

use super::transform::ResponseTransform;
use crate::config::{join_path, ConfigResult, ConfigurationError, GatewayConfig, ServiceDescriptor};
use crate::gateway::{GatewayError, GatewayRequest};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Request parameters; ordered so rendered URLs and cache keys are deterministic
pub type RequestParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Idempotency per HTTP semantics, used when an endpoint does not say otherwise
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Get | Self::Put | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How credentials are attached to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer,
    /// Raw token in the service's `auth_header`
    ServiceSpecific,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bearer => write!(f, "bearer"),
            Self::ServiceSpecific => write!(f, "service_specific"),
        }
    }
}

/// How the cache key of a cacheable endpoint is derived
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    /// Method plus the full rendered URL, query included
    #[default]
    Url,
    /// Method plus the rendered path, query ignored
    Path,
    /// Rendered path plus only the named params
    Params { names: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub key: CacheKeyStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Path with `{param}` placeholders, parsed once at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(open) = rest.find(|c| c == '{' || c == '}') {
            if rest.as_bytes()[open] == b'}' {
                return Err(format!("unmatched '}}' in path template '{raw}'"));
            }
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| format!("unclosed '{{' in path template '{raw}'"))?;
            let name = &after[..close];
            if name.is_empty() || name.contains('{') {
                return Err(format!("invalid placeholder in path template '{raw}'"));
            }
            segments.push(Segment::Param(name.to_string()));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute placeholders; returns the path or the first missing param name
    pub fn render(&self, params: &RequestParams) -> Result<String, String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) => {
                    let value = params.get(name).ok_or_else(|| name.clone())?;
                    out.push_str(&encode_component(value));
                }
            }
        }
        Ok(out)
    }
}

/// Percent-encode everything outside RFC 3986's unreserved set
fn encode_component(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// One logical operation, validated at load time
#[derive(Debug, Clone)]
pub struct EndpointDefinition {
    pub key: String,
    pub service_id: String,
    pub path: PathTemplate,
    pub method: HttpMethod,
    pub auth: AuthType,
    pub cache: Option<CachePolicy>,
    pub transform: ResponseTransform,
    /// Governs gateway-level retry eligibility
    pub idempotent: bool,
}

/// A logical request resolved against its endpoint and service
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub endpoint_key: String,
    pub service_id: String,
    pub method: HttpMethod,
    pub url: String,
    /// Scoped to the endpoint, since endpoints sharing a URL may transform differently
    pub cache_key: Option<String>,
    /// Identity of the request for in-flight deduplication, scoped like `cache_key`
    pub flight_key: String,
}

/// Immutable table of services and endpoints
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    services: HashMap<String, ServiceDescriptor>,
    base_urls: HashMap<String, Url>,
    endpoints: HashMap<String, EndpointDefinition>,
}

impl EndpointRegistry {
    pub fn from_config(config: &GatewayConfig) -> ConfigResult<Self> {
        config.validate()?;

        let services: HashMap<String, ServiceDescriptor> = config
            .services
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();

        let mut base_urls = HashMap::with_capacity(services.len());
        for service in services.values() {
            let base = service.parse_base_url().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("services.{}.base_url", service.id),
                    &service.base_url,
                    reason,
                )
            })?;
            base_urls.insert(service.id.clone(), base);
        }

        let mut endpoints = HashMap::with_capacity(config.endpoints.len());
        for (key, ep) in &config.endpoints {
            let service = services.get(&ep.service).ok_or_else(|| {
                ConfigurationError::UnknownServiceReference {
                    endpoint: key.clone(),
                    service: ep.service.clone(),
                }
            })?;
            let path = PathTemplate::parse(&ep.path).map_err(|reason| {
                ConfigurationError::invalid_value(format!("endpoints.{key}.path"), &ep.path, reason)
            })?;
            let cache = ep.cache.as_ref().map(|policy| CachePolicy {
                ttl: Duration::from_millis(policy.ttl_ms.unwrap_or(service.cache_default_ttl_ms)),
                key: policy.key.clone(),
            });

            endpoints.insert(
                key.clone(),
                EndpointDefinition {
                    key: key.clone(),
                    service_id: ep.service.clone(),
                    path,
                    method: ep.method,
                    auth: ep.auth,
                    cache,
                    transform: ep.transform.clone(),
                    idempotent: ep.idempotent.unwrap_or_else(|| ep.method.is_idempotent()),
                },
            );
        }

        Ok(Self {
            services,
            base_urls,
            endpoints,
        })
    }

    pub fn get(&self, key: &str) -> Option<&EndpointDefinition> {
        self.endpoints.get(key)
    }

    pub fn service(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.services.get(id)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn endpoint_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Service backing an endpoint key
    pub fn service_for_endpoint(&self, key: &str) -> Option<&str> {
        self.endpoints.get(key).map(|ep| ep.service_id.as_str())
    }

    /// Resolve a logical request into URL, cache key and flight key
    pub fn resolve(
        &self,
        key: &str,
        request: &GatewayRequest,
    ) -> Result<(&EndpointDefinition, &ServiceDescriptor, ResolvedRequest), GatewayError> {
        let endpoint = self
            .endpoints
            .get(key)
            .ok_or_else(|| GatewayError::unknown_endpoint(key))?;
        let service = self.services.get(&endpoint.service_id).ok_or_else(|| {
            GatewayError::configuration(
                key,
                format!("endpoint references unknown service '{}'", endpoint.service_id),
            )
        })?;

        let path = endpoint.path.render(&request.params).map_err(|missing| {
            GatewayError::configuration(key, format!("missing path parameter '{missing}'"))
        })?;

        let placeholders: Vec<&str> = endpoint.path.placeholders().collect();
        let query: Vec<(&String, &String)> = request
            .params
            .iter()
            .filter(|(name, _)| !placeholders.contains(&name.as_str()))
            .collect();

        let base = self.base_urls.get(&service.id).ok_or_else(|| {
            GatewayError::configuration(key, format!("no base URL for service '{}'", service.id))
        })?;
        let mut url = join_path(base, &path).map_err(|reason| {
            GatewayError::configuration(key, format!("cannot build URL for '{path}': {reason}"))
        })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let url = String::from(url);

        let cache_key = endpoint.cache.as_ref().map(|policy| match &policy.key {
            CacheKeyStrategy::Url => format!("{}:{}:{} {}", service.id, key, endpoint.method, url),
            CacheKeyStrategy::Path => format!("{}:{}:{} {}", service.id, key, endpoint.method, path),
            CacheKeyStrategy::Params { names } => {
                let selected = request
                    .params
                    .iter()
                    .filter(|(name, _)| names.contains(name));
                format!(
                    "{}:{}:{} {}?{}",
                    service.id,
                    key,
                    endpoint.method,
                    path,
                    encode_query(selected)
                )
            }
        });

        let body = request
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let flight_key = format!("{key}:{} {}#{}", endpoint.method, url, body);

        Ok((
            endpoint,
            service,
            ResolvedRequest {
                endpoint_key: key.to_string(),
                service_id: service.id.clone(),
                method: endpoint.method,
                url,
                cache_key,
                flight_key,
            },
        ))
    }
}

fn encode_query<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    pairs
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}
