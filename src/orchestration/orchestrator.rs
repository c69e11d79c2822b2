//! # Service Orchestrator
//!
//! Executes multi-step workflows as sagas. Steps run strictly in declaration
//! order, each with its own retry budget on top of the gateway's retries. When a
//! critical step fails, or the run is cancelled, every already-succeeded step is
//! compensated in reverse order, best-effort.
//!
//! ## Run lifecycle
//!
//! ```text
//! Pending ──▶ Running ──▶ Succeeded
//!    │           │
//!    ▼           ▼
//!  Failed    Compensating ──▶ Compensated | Failed
//! ```
//!
//! A run is published through the [`RunStore`] after every change, so
//! [`ServiceOrchestrator::get_run`] and [`ServiceOrchestrator::watch_run`] can be
//! used while it progresses.

use super::run_store::{RunStore, RunTracker};
use super::states::{check_step_transition, check_workflow_transition, StepStatus, WorkflowStatus};
use super::types::{
    CompensationResult, StepAction, StepDefinition, StepError, WorkflowContext,
    WorkflowDefinition, WorkflowRun,
};
use crate::config::{BackoffConfig, OrchestrationConfig};
use crate::constants::events;
use crate::error::{ResilienceError, Result};
use crate::events::EventPublisher;
use crate::gateway::{ApiGateway, GatewayErrorCode};
use crate::health::{HealthMonitor, HealthStatus};
use crate::logging::{log_error, log_step_operation, log_workflow_operation};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the forward phase of a run ended
enum ForwardOutcome {
    Completed,
    Aborted { step: String, error: StepError },
}

#[derive(Debug)]
pub struct ServiceOrchestrator {
    gateway: Arc<ApiGateway>,
    health: Arc<HealthMonitor>,
    runs: Arc<RunStore>,
    workflows: DashMap<String, Arc<WorkflowDefinition>>,
    config: OrchestrationConfig,
    max_retry_delay: Duration,
    events: Option<EventPublisher>,
}

impl ServiceOrchestrator {
    pub fn new(
        gateway: Arc<ApiGateway>,
        health: Arc<HealthMonitor>,
        config: OrchestrationConfig,
        backoff: &BackoffConfig,
    ) -> Self {
        let runs = Arc::new(RunStore::new(
            config.run_retention(),
            config.max_retained_runs,
        ));
        Self {
            gateway,
            health,
            runs,
            workflows: DashMap::new(),
            config,
            max_retry_delay: backoff.max_delay(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate and register a workflow for execution by name
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        self.validate(&definition)?;
        info!(
            workflow = %definition.name,
            steps = definition.steps.len(),
            "📝 Workflow registered"
        );
        self.workflows
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn workflow(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name).map(|w| Arc::clone(w.value()))
    }

    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.iter().map(|w| w.key().clone()).collect();
        names.sort();
        names
    }

    fn validate(&self, definition: &WorkflowDefinition) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(ResilienceError::InvalidWorkflow(
                "workflow name must not be empty".to_string(),
            ));
        }
        if definition.steps.is_empty() {
            return Err(ResilienceError::InvalidWorkflow(format!(
                "workflow '{}' has no steps",
                definition.name
            )));
        }

        let registry = self.gateway.registry();
        let mut seen = HashSet::new();
        for step in &definition.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(ResilienceError::InvalidWorkflow(format!(
                    "workflow '{}' declares step '{}' twice",
                    definition.name, step.name
                )));
            }

            let actions = std::iter::once(&step.action).chain(step.compensate.as_ref());
            for key in actions.filter_map(StepAction::endpoint_key) {
                if registry.get(key).is_none() {
                    return Err(ResilienceError::InvalidWorkflow(format!(
                        "step '{}' references unknown endpoint '{key}'",
                        step.name
                    )));
                }
            }
            for service in &step.services {
                if registry.service(service).is_none() {
                    return Err(ResilienceError::InvalidWorkflow(format!(
                        "step '{}' requires unknown service '{service}'",
                        step.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run a workflow to completion and return its final state
    pub async fn execute(&self, definition: &WorkflowDefinition, input: Value) -> WorkflowRun {
        self.runs.prune();
        let tracker = self.runs.insert(WorkflowRun::new(definition));
        self.drive(definition, input, tracker).await
    }

    /// Run a registered workflow to completion
    pub async fn execute_named(&self, name: &str, input: Value) -> Result<WorkflowRun> {
        let definition = self
            .workflow(name)
            .ok_or_else(|| ResilienceError::UnknownWorkflow(name.to_string()))?;
        Ok(self.execute(&definition, input).await)
    }

    /// Start a workflow in the background. The run is observable as soon as this
    /// returns.
    pub fn start(self: &Arc<Self>, definition: Arc<WorkflowDefinition>, input: Value) -> Uuid {
        self.runs.prune();
        let tracker = self.runs.insert(WorkflowRun::new(&definition));
        let run_id = tracker.id();

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.drive(&definition, input, tracker).await;
        });
        run_id
    }

    pub fn start_named(self: &Arc<Self>, name: &str, input: Value) -> Result<Uuid> {
        let definition = self
            .workflow(name)
            .ok_or_else(|| ResilienceError::UnknownWorkflow(name.to_string()))?;
        Ok(self.start(definition, input))
    }

    pub fn get_run(&self, run_id: Uuid) -> Option<WorkflowRun> {
        self.runs.get(run_id)
    }

    pub fn watch_run(&self, run_id: Uuid) -> Result<tokio::sync::watch::Receiver<WorkflowRun>> {
        self.runs.watch(run_id)
    }

    /// Request cancellation of a running workflow; succeeded steps are still
    /// compensated. Returns `false` if the run already finished.
    pub fn cancel(&self, run_id: Uuid) -> Result<bool> {
        let requested = self.runs.cancel(run_id)?;
        if requested {
            info!(run_id = %run_id, "🛑 Workflow cancellation requested");
        }
        Ok(requested)
    }

    pub fn prune_runs(&self) -> usize {
        self.runs.prune()
    }

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        tracker: RunTracker,
    ) -> WorkflowRun {
        let run_id = tracker.id();
        log_workflow_operation("start", Some(run_id), &definition.name, "pending", None);

        if let Some(reason) = self.unhealthy_precondition(definition) {
            self.set_status(&tracker, WorkflowStatus::Failed);
            tracker.update(|run| run.error = Some(reason.clone()));
            log_workflow_operation(
                "precondition",
                Some(run_id),
                &definition.name,
                "failed",
                Some(&reason),
            );
            return self.finish(&tracker);
        }

        self.set_status(&tracker, WorkflowStatus::Running);
        self.publish(
            events::WORKFLOW_STARTED,
            json!({ "run_id": run_id, "workflow": definition.name }),
        );

        let mut context = WorkflowContext::new(input);
        let mut succeeded: Vec<usize> = Vec::new();
        let outcome = self
            .run_forward(definition, &tracker, &mut context, &mut succeeded)
            .await;

        match outcome {
            ForwardOutcome::Completed => {
                self.set_status(&tracker, WorkflowStatus::Succeeded);
            }
            ForwardOutcome::Aborted { step, error } => {
                let reason = format!("step '{step}' failed: {error}");
                tracker.update(|run| run.error = Some(reason.clone()));
                self.compensate(definition, &tracker, &context, &succeeded)
                    .await;
            }
        }

        self.finish(&tracker)
    }

    /// Name the first Unhealthy service a critical step depends on
    fn unhealthy_precondition(&self, definition: &WorkflowDefinition) -> Option<String> {
        let registry = self.gateway.registry();
        definition
            .steps
            .iter()
            .filter(|step| step.critical)
            .flat_map(|step| {
                step.action
                    .endpoint_key()
                    .and_then(|key| registry.service_for_endpoint(key))
                    .map(str::to_string)
                    .into_iter()
                    .chain(step.services.iter().cloned())
            })
            .find(|service_id| {
                self.health
                    .service_status(service_id)
                    .is_some_and(|snapshot| snapshot.status == HealthStatus::Unhealthy)
            })
            .map(|service_id| format!("required service '{service_id}' is unhealthy"))
    }

    async fn run_forward(
        &self,
        definition: &WorkflowDefinition,
        tracker: &RunTracker,
        context: &mut WorkflowContext,
        succeeded: &mut Vec<usize>,
    ) -> ForwardOutcome {
        for (index, step) in definition.steps.iter().enumerate() {
            if tracker.is_cancelled() {
                return ForwardOutcome::Aborted {
                    step: step.name.clone(),
                    error: StepError::Cancelled,
                };
            }

            match self.run_step(index, step, tracker, context).await {
                Ok(output) => {
                    context.record(&step.name, output);
                    succeeded.push(index);
                }
                Err(StepError::Cancelled) => {
                    return ForwardOutcome::Aborted {
                        step: step.name.clone(),
                        error: StepError::Cancelled,
                    };
                }
                Err(error) if step.critical => {
                    return ForwardOutcome::Aborted {
                        step: step.name.clone(),
                        error,
                    };
                }
                Err(error) => {
                    debug!(
                        run_id = %tracker.id(),
                        step_name = %step.name,
                        error = %error,
                        "⏭️ Non-critical step failed, continuing"
                    );
                }
            }
        }
        ForwardOutcome::Completed
    }

    /// Execute one step with its retry budget, recording every attempt
    async fn run_step(
        &self,
        index: usize,
        step: &StepDefinition,
        tracker: &RunTracker,
        context: &WorkflowContext,
    ) -> std::result::Result<Value, StepError> {
        let run_id = tracker.id();
        let max_attempts = step.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.set_step_status(tracker, index, StepStatus::Running, attempt, None);
            log_step_operation("execute", run_id, &step.name, attempt, "running", None);

            let result = self.perform(&step.action, context, tracker, true).await;

            let error = match result {
                Ok(output) => {
                    self.set_step_status(tracker, index, StepStatus::Succeeded, attempt, None);
                    log_step_operation("execute", run_id, &step.name, attempt, "succeeded", None);
                    self.publish(
                        events::WORKFLOW_STEP_COMPLETED,
                        json!({ "run_id": run_id, "step": step.name, "attempt": attempt }),
                    );
                    return Ok(output);
                }
                Err(error) => error,
            };

            let retry = error.is_retryable() && attempt < max_attempts && !tracker.is_cancelled();
            if retry {
                let delay = self.step_retry_delay(attempt);
                warn!(
                    run_id = %run_id,
                    step_name = %step.name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "🔁 Step failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = tracker.cancelled() => {
                        return Err(self.fail_step(tracker, index, step, attempt, StepError::Cancelled));
                    }
                }
            }

            return Err(self.fail_step(tracker, index, step, attempt, error));
        }
    }

    fn fail_step(
        &self,
        tracker: &RunTracker,
        index: usize,
        step: &StepDefinition,
        attempt: u32,
        error: StepError,
    ) -> StepError {
        let message = error.to_string();
        self.set_step_status(
            tracker,
            index,
            StepStatus::Failed,
            attempt,
            Some(message.clone()),
        );
        log_step_operation(
            "execute",
            tracker.id(),
            &step.name,
            attempt,
            "failed",
            Some(&message),
        );
        self.publish(
            events::WORKFLOW_STEP_FAILED,
            json!({
                "run_id": tracker.id(),
                "step": step.name,
                "attempt": attempt,
                "critical": step.critical,
                "error": message,
            }),
        );
        error
    }

    fn step_retry_delay(&self, attempt: u32) -> Duration {
        step_retry_delay(self.config.step_retry_delay(), attempt, self.max_retry_delay)
    }

    /// Run a step or compensation action. Forward actions end early when the run
    /// is cancelled; compensations always run to completion.
    async fn perform(
        &self,
        action: &StepAction,
        context: &WorkflowContext,
        tracker: &RunTracker,
        cancellable: bool,
    ) -> std::result::Result<Value, StepError> {
        match action {
            StepAction::Endpoint { key, build } => {
                let request = build(context)?;
                let result = if cancellable {
                    self.gateway
                        .request_with_cancel(key, request, tracker.cancelled())
                        .await
                } else {
                    self.gateway.request(key, request).await
                };
                match result {
                    Ok(response) => Ok(response.data),
                    Err(e) if e.code == GatewayErrorCode::Cancelled => Err(StepError::Cancelled),
                    Err(e) => Err(StepError::Gateway(e)),
                }
            }
            StepAction::Inline(handler) if cancellable => {
                tokio::select! {
                    result = handler.run(context) => result,
                    _ = tracker.cancelled() => Err(StepError::Cancelled),
                }
            }
            StepAction::Inline(handler) => handler.run(context).await,
        }
    }

    async fn compensate(
        &self,
        definition: &WorkflowDefinition,
        tracker: &RunTracker,
        context: &WorkflowContext,
        succeeded: &[usize],
    ) {
        let run_id = tracker.id();
        self.set_status(tracker, WorkflowStatus::Compensating);
        self.publish(
            events::WORKFLOW_COMPENSATING,
            json!({ "run_id": run_id, "workflow": definition.name }),
        );
        log_workflow_operation("compensate", Some(run_id), &definition.name, "compensating", None);

        let mut all_succeeded = true;
        for &index in succeeded.iter().rev() {
            let step = &definition.steps[index];
            let Some(action) = &step.compensate else {
                continue;
            };

            let result = self.perform(action, context, tracker, false).await;
            let compensation = match result {
                Ok(_) => {
                    info!(run_id = %run_id, step_name = %step.name, "↩️ Step compensated");
                    CompensationResult {
                        step: step.name.clone(),
                        succeeded: true,
                        error: None,
                    }
                }
                Err(error) => {
                    all_succeeded = false;
                    log_error(
                        "orchestrator",
                        "compensate",
                        &error.to_string(),
                        Some(&format!("run_id={run_id} step={}", step.name)),
                    );
                    CompensationResult {
                        step: step.name.clone(),
                        succeeded: false,
                        error: Some(error.to_string()),
                    }
                }
            };
            tracker.update(|run| run.compensations.push(compensation));
        }

        let status = if all_succeeded {
            WorkflowStatus::Compensated
        } else {
            WorkflowStatus::Failed
        };
        self.set_status(tracker, status);
    }

    fn finish(&self, tracker: &RunTracker) -> WorkflowRun {
        tracker.update(|run| run.finished_at = Some(Utc::now()));
        self.runs.mark_finished(tracker.id());

        let run = tracker.snapshot();
        log_workflow_operation(
            "finish",
            Some(run.id),
            &run.workflow,
            &run.status.to_string(),
            run.error.as_deref(),
        );
        self.publish(
            events::WORKFLOW_FINISHED,
            json!({
                "run_id": run.id,
                "workflow": run.workflow,
                "status": run.status,
                "error": run.error,
            }),
        );
        run
    }

    fn set_status(&self, tracker: &RunTracker, to: WorkflowStatus) {
        let from = tracker.snapshot().status;
        if let Err(e) = check_workflow_transition(from, to) {
            log_error("orchestrator", "set_status", &e.to_string(), None);
            return;
        }
        tracker.update(|run| run.status = to);
    }

    fn set_step_status(
        &self,
        tracker: &RunTracker,
        index: usize,
        to: StepStatus,
        attempt: u32,
        error: Option<String>,
    ) {
        let Some(current) = tracker.snapshot().steps.get(index).cloned() else {
            return;
        };
        if let Err(e) = check_step_transition(&current.name, current.status, to) {
            log_error("orchestrator", "set_step_status", &e.to_string(), None);
            return;
        }
        tracker.update(|run| {
            if let Some(step) = run.steps.get_mut(index) {
                step.status = to;
                step.attempt = attempt;
                step.error = error;
            }
        });
    }

    fn publish(&self, name: &str, context: Value) {
        if let Some(publisher) = &self.events {
            publisher.publish(name, context);
        }
    }
}

/// `base × 2^(attempt-1)`, capped at `max`
fn step_retry_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(max)
}
