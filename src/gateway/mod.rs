//! # Gateway Module
//!
//! Unified request routing with caching, deduplication, auth injection, retry
//! and error normalization.

pub mod api_gateway;
pub mod classifier;
pub mod errors;
pub mod inflight;

pub use api_gateway::{ApiGateway, GatewayRequest, GatewayResponse};
pub use classifier::{classify, parse_retry_after, OutcomeClass};
pub use errors::{GatewayError, GatewayErrorCode};
pub use inflight::{Flight, FlightLeader, InFlightRequests};
