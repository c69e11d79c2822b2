//! # Orchestration
//!
//! Saga-style execution of multi-step workflows over the [`crate::gateway`].
//!
//! - [`ServiceOrchestrator`]: runs workflows, compensates on failure, cancels on request
//! - [`RunStore`]: observable, bounded retention of [`WorkflowRun`]s
//! - [`states`]: run and step state machines
//! - [`workflows`]: built-in workflow definitions

pub mod orchestrator;
pub mod run_store;
pub mod states;
pub mod types;
pub mod workflows;

pub use orchestrator::ServiceOrchestrator;
pub use run_store::{RunStore, RunTracker};
pub use states::{StepStatus, WorkflowStatus};
pub use types::{
    CompensationResult, FnHandler, StepAction, StepDefinition, StepError, StepHandler,
    StepResult, WorkflowContext, WorkflowDefinition, WorkflowRun,
};
