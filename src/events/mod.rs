//! Lifecycle event broadcasting for breaker transitions, health checks and
//! workflow progress.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};
