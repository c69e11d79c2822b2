//! # Circuit Breaker Implementation
//!
//! Per-service failure-counting state machine with three states: Closed (normal
//! operation), Open (failing fast) and HalfOpen (a single trial call checks for
//! recovery). The breaker only counts outcomes; deciding whether an outcome is a
//! failure belongs to the caller.

use super::clock::Clock;
use super::metrics::CircuitBreakerMetrics;
use crate::config::ServiceDescriptor;
use crate::constants::events;
use crate::events::EventPublisher;
use crate::logging::log_breaker_transition;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - exactly one trial call allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one breaker, safe to hand to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    pub service_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Present only while Open
    pub opened_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    last_transition_at: DateTime<Utc>,
    trial_in_flight: bool,
    metrics: CircuitBreakerMetrics,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    consecutive_failures: u32,
}

/// Circuit breaker for a single service.
///
/// All state lives behind one `parking_lot` mutex; no method awaits or performs
/// I/O while holding it.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_id: String,
    failure_threshold: u32,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
    events: Option<EventPublisher>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        service_id: impl Into<String>,
        failure_threshold: u32,
        open_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service_id = service_id.into();
        debug!(
            service_id = %service_id,
            failure_threshold,
            open_duration_ms = open_duration.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            service_id,
            failure_threshold: failure_threshold.max(1),
            open_duration,
            clock,
            events: None,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                last_transition_at: Utc::now(),
                trial_in_flight: false,
                metrics: CircuitBreakerMetrics::new(),
            }),
        }
    }

    pub fn for_service(descriptor: &ServiceDescriptor, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            descriptor.id.clone(),
            descriptor.breaker_failure_threshold,
            descriptor.breaker_open_duration(),
            clock,
        )
    }

    /// Publish every transition to the given event channel
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Current stored state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            service_id: self.service_id.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
            last_transition_at: inner.last_transition_at,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        inner.metrics.snapshot(inner.state)
    }

    /// Would `allow_request` grant a call right now? Never mutates state.
    pub fn peek(&self) -> bool {
        let inner = self.inner.lock();
        let current = inner.state;
        match current {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(&inner),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Claim permission for one call.
    ///
    /// While Open with the cooldown elapsed this moves to HalfOpen and grants the
    /// single trial; any other caller gets `false` until the trial resolves.
    pub fn allow_request(&self) -> bool {
        let mut transitions = Vec::new();
        let allowed = {
            let mut inner = self.inner.lock();
            let current = inner.state;
            let allowed = match current {
                CircuitState::Closed => true,
                CircuitState::Open if self.cooldown_elapsed(&inner) => {
                    transitions.push(self.transition(&mut inner, CircuitState::HalfOpen));
                    inner.trial_in_flight = true;
                    true
                }
                CircuitState::Open => false,
                CircuitState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    true
                }
                CircuitState::HalfOpen => false,
            };
            if !allowed {
                inner.metrics.rejected_count += 1;
            }
            allowed
        };

        self.announce(&transitions);
        allowed
    }

    /// Give back a HalfOpen trial whose outcome says nothing about service health
    pub fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn record_success(&self) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.metrics.record_success();

            if inner.state == CircuitState::Open {
                if self.cooldown_elapsed(&inner) {
                    transitions.push(self.transition(&mut inner, CircuitState::HalfOpen));
                } else {
                    debug!(
                        service_id = %self.service_id,
                        "🔴 Success recorded while open; waiting for cooldown"
                    );
                }
            }

            let current = inner.state;
            match current {
                CircuitState::HalfOpen => {
                    inner.consecutive_failures = 0;
                    transitions.push(self.transition(&mut inner, CircuitState::Closed));
                }
                CircuitState::Closed => inner.consecutive_failures = 0,
                CircuitState::Open => {}
            }
        }

        self.announce(&transitions);
    }

    pub fn record_failure(&self) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.metrics.record_failure();
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

            let current = inner.state;
            match current {
                CircuitState::Closed => {
                    if inner.consecutive_failures >= self.failure_threshold {
                        transitions.push(self.transition(&mut inner, CircuitState::Open));
                    }
                }
                CircuitState::HalfOpen => {
                    transitions.push(self.transition(&mut inner, CircuitState::Open));
                }
                CircuitState::Open if self.cooldown_elapsed(&inner) => {
                    // A failed check after cooldown counts as a failed trial
                    transitions.push(self.transition(&mut inner, CircuitState::HalfOpen));
                    transitions.push(self.transition(&mut inner, CircuitState::Open));
                }
                CircuitState::Open => {}
            }
        }

        self.announce(&transitions);
    }

    /// Manual operator override back to Closed
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.consecutive_failures = 0;
            inner.trial_in_flight = false;
            (inner.state != CircuitState::Closed)
                .then(|| self.transition(&mut inner, CircuitState::Closed))
        };

        warn!(service_id = %self.service_id, "🚨 Circuit breaker reset by operator");
        if let Some(publisher) = &self.events {
            publisher.publish(
                events::CIRCUIT_BREAKER_RESET,
                json!({ "service_id": self.service_id }),
            );
        }
        self.announce(transition.as_slice());
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(service_id = %self.service_id, "🚨 Circuit breaker forced open");
        let transition = {
            let mut inner = self.inner.lock();
            (inner.state != CircuitState::Open)
                .then(|| self.transition(&mut inner, CircuitState::Open))
        };
        self.announce(transition.as_slice());
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|opened| self.clock.now() >= opened + self.open_duration)
            .unwrap_or(true)
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) -> Transition {
        let from = inner.state;
        inner.state = to;
        inner.last_transition_at = Utc::now();
        inner.metrics.transition_count += 1;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(self.clock.now());
                inner.opened_at_wall = Some(inner.last_transition_at);
                inner.trial_in_flight = false;
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.opened_at_wall = None;
                inner.trial_in_flight = false;
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.opened_at = None;
                inner.opened_at_wall = None;
                inner.trial_in_flight = false;
            }
        }

        Transition {
            from,
            to,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    fn announce(&self, transitions: &[Transition]) {
        for t in transitions {
            log_breaker_transition(&self.service_id, t.from, t.to, t.consecutive_failures);
            if let Some(publisher) = &self.events {
                publisher.publish(
                    events::CIRCUIT_BREAKER_STATE_CHANGED,
                    json!({
                        "service_id": self.service_id,
                        "from": t.from,
                        "to": t.to,
                        "consecutive_failures": t.consecutive_failures,
                    }),
                );
            }
        }
    }
}
