//! Cross-plugin workflow orchestration for Flowmate.
//!
//! This crate provides:
//!
//! - **Catalog**: statically defined workflow templates, validated and
//!   planned at registration ([`catalog::WorkflowCatalog`],
//!   [`builtin`]).
//! - **Trigger detection**: weighted phrase/keyword matching of user
//!   messages against the catalog ([`trigger::KeywordTriggerDetector`]).
//! - **Parameter extraction**: emails, dates and search terms pulled from
//!   the message into the seed context ([`extract`]).
//! - **Execution**: dependency-ordered, wave-parallel step execution with
//!   retry, backoff and partial success ([`engine::WorkflowEngine`]).
//! - **Record store**: concurrent in-memory execution records with
//!   cooperative cancellation ([`store::ExecutionStore`]).
//!
//! [`orchestrator::Orchestrator`] ties these together behind the detect /
//! start / inspect / cancel operations.

pub mod builtin;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod placeholder;
pub mod planner;
pub mod store;
pub mod template;
pub mod trigger;

pub use catalog::{RegisteredWorkflow, WorkflowCatalog};
pub use config::{EngineConfig, FlowmateConfig, TriggerWeights};
pub use engine::{WorkflowEngine, backoff_delay};
pub use error::{IntentError, Result};
pub use orchestrator::Orchestrator;
pub use placeholder::resolve_template;
pub use planner::ExecutionPlan;
pub use store::ExecutionStore;
pub use template::{
    Context, ExecutionState, ExecutorRef, ParamTemplate, StepErrorKind, StepExecution, StepStatus,
    StepTemplate, TriggerSpec, WorkflowExecution, WorkflowTemplate,
};
pub use trigger::{KeywordTriggerDetector, TriggerDetector, TriggerScore};
