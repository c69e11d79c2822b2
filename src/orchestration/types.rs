//! # Orchestration Types
//!
//! Workflow and step definitions, the context threaded between steps, and the
//! observable [`WorkflowRun`] record.

use super::states::{StepStatus, WorkflowStatus};
use crate::gateway::{GatewayError, GatewayErrorCode, GatewayRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Why a step attempt failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error(transparent)]
    Gateway(GatewayError),

    /// Application-level condition expected to clear, e.g. a briefly locked slot
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("run cancelled")]
    Cancelled,
}

impl StepError {
    /// Whether another attempt of the same step may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.retryable || e.code == GatewayErrorCode::CircuitOpen,
            Self::Transient(_) => true,
            Self::Permanent(_) | Self::Cancelled => false,
        }
    }
}

impl From<GatewayError> for StepError {
    fn from(error: GatewayError) -> Self {
        Self::Gateway(error)
    }
}

/// Workflow input plus the output of every succeeded step, keyed by step name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowContext {
    input: Value,
    results: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            results: Map::new(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Output of an earlier step
    pub fn result(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    /// Look up a value by JSON pointer, first in step results then in the input.
    /// `"/create_appointment/id"` reads `id` from that step's output.
    pub fn lookup(&self, pointer: &str) -> Option<&Value> {
        let mut segments = pointer.trim_start_matches('/').splitn(2, '/');
        let head = segments.next().unwrap_or_default();
        if let Some(step_output) = self.results.get(head) {
            return match segments.next() {
                Some(rest) => step_output.pointer(&format!("/{rest}")),
                None => Some(step_output),
            };
        }
        self.input.pointer(pointer)
    }

    pub fn record(&mut self, step: &str, output: Value) {
        self.results.insert(step.to_string(), output);
    }

    pub fn results(&self) -> &Map<String, Value> {
        &self.results
    }
}

/// Custom step logic
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, context: &WorkflowContext) -> Result<Value, StepError>;
}

/// Adapter turning an async closure into a [`StepHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    async fn run(&self, context: &WorkflowContext) -> Result<Value, StepError> {
        (self.0)(context.clone()).await
    }
}

pub type RequestBuilder =
    Arc<dyn Fn(&WorkflowContext) -> Result<GatewayRequest, StepError> + Send + Sync>;

/// What a step (or its compensation) does
#[derive(Clone)]
pub enum StepAction {
    /// Call a gateway endpoint with a request built from the context
    Endpoint { key: String, build: RequestBuilder },
    Inline(Arc<dyn StepHandler>),
}

impl StepAction {
    /// Endpoint call without params or body
    pub fn endpoint(key: impl Into<String>) -> Self {
        Self::endpoint_with(key, |_| Ok(GatewayRequest::new()))
    }

    pub fn endpoint_with<B>(key: impl Into<String>, build: B) -> Self
    where
        B: Fn(&WorkflowContext) -> Result<GatewayRequest, StepError> + Send + Sync + 'static,
    {
        Self::Endpoint {
            key: key.into(),
            build: Arc::new(build),
        }
    }

    pub fn inline<F, Fut>(f: F) -> Self
    where
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self::Inline(Arc::new(FnHandler(f)))
    }

    pub fn handler(handler: Arc<dyn StepHandler>) -> Self {
        Self::Inline(handler)
    }

    pub fn endpoint_key(&self) -> Option<&str> {
        match self {
            Self::Endpoint { key, .. } => Some(key),
            Self::Inline(_) => None,
        }
    }
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint { key, .. } => f.debug_struct("Endpoint").field("key", key).finish(),
            Self::Inline(_) => f.write_str("Inline"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub name: String,
    pub action: StepAction,
    /// A failed critical step aborts the run and triggers compensation
    pub critical: bool,
    pub compensate: Option<StepAction>,
    /// Step-level retries, independent of gateway retries
    pub max_retries: u32,
    /// Services an inline step depends on, for the health precondition
    pub services: Vec<String>,
}

impl StepDefinition {
    /// Critical step without retries or compensation
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            critical: true,
            compensate: None,
            max_retries: 0,
            services: Vec::new(),
        }
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn compensate(mut self, action: StepAction) -> Self {
        self.compensate = Some(action);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn requires_service(mut self, service_id: impl Into<String>) -> Self {
        self.services.push(service_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    /// Attempts made so far, 0 until the step starts
    pub attempt: u32,
    pub error: Option<String>,
}

/// Outcome of one compensation action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationResult {
    pub step: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// One execution of a workflow, published to observers as it progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepResult>,
    pub compensations: Vec<CompensationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkflowRun {
    pub fn new(definition: &WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow: definition.name.clone(),
            status: WorkflowStatus::Pending,
            steps: definition
                .steps
                .iter()
                .map(|step| StepResult {
                    name: step.name.clone(),
                    status: StepStatus::Pending,
                    attempt: 0,
                    error: None,
                })
                .collect(),
            compensations: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_lookup_prefers_step_results() {
        let mut ctx = WorkflowContext::new(json!({"patient": {"id": 7}}));
        ctx.record("create_appointment", json!({"id": 42}));

        assert_eq!(ctx.lookup("/create_appointment/id"), Some(&json!(42)));
        assert_eq!(ctx.lookup("/create_appointment"), Some(&json!({"id": 42})));
        assert_eq!(ctx.lookup("/patient/id"), Some(&json!(7)));
        assert_eq!(ctx.lookup("/missing"), None);
    }

    #[test]
    fn test_step_error_retryability() {
        assert!(StepError::Transient("locked".into()).is_retryable());
        assert!(!StepError::Permanent("bad".into()).is_retryable());
        assert!(StepError::Gateway(GatewayError::circuit_open("appointments")).is_retryable());
        assert!(!StepError::Gateway(GatewayError::new(GatewayErrorCode::ClientError, "422"))
            .is_retryable());
    }

    #[test]
    fn test_new_run_lists_pending_steps() {
        let def = WorkflowDefinition::new("demo")
            .step(StepDefinition::new("a", StepAction::endpoint("glucose.latest")))
            .step(StepDefinition::new("b", StepAction::endpoint("appointments.create")).critical(false));
        let run = WorkflowRun::new(&def);

        assert_eq!(run.status, WorkflowStatus::Pending);
        assert_eq!(run.steps.len(), 2);
        assert!(run.steps.iter().all(|s| s.status == StepStatus::Pending && s.attempt == 0));
        assert!(!def.steps[1].critical);
    }
}
