//! # Endpoint Registry
//!
//! Static mapping of logical operation keys (`"glucose.create"`) to the physical
//! service, path template, method, auth, cache and transform rules. Built once
//! from validated configuration and never mutated afterwards.

pub mod endpoint;
pub mod transform;

pub use endpoint::{
    AuthType, CacheKeyStrategy, CachePolicy, EndpointDefinition, EndpointRegistry, HttpMethod,
    PathTemplate, RequestParams, ResolvedRequest,
};
pub use transform::ResponseTransform;
