//! # Event Publisher
//!
//! Fire-and-forget broadcast of lifecycle events. Slow subscribers lag and lose
//! the oldest events rather than blocking the gateway.
//!
//! ```rust
//! use diabetactic_gateway::events::EventPublisher;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! publisher.publish("circuit_breaker.state_changed", json!({"service_id": "tidepool"}));
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.name, "circuit_breaker.state_changed");
//! # });
//! ```

use crate::config::EventsConfig;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast publisher for resilience lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    /// Publish an event with the given name and context.
    ///
    /// Never blocks and never fails: callers publish from inside short critical
    /// sections, and having no subscribers is the normal case.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(event = %event.name, "No subscribers for event");
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::from_config(&EventsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish("workflow.started", json!({"run_id": "abc"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "workflow.started");
        assert_eq!(event.context["run_id"], "abc");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let publisher = EventPublisher::default();
        publisher.publish("health.check_completed", json!({}));
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
