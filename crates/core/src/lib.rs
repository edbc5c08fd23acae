//! Core execution engine: plan model, task library, and orchestrator.
//!
//! A caller submits an [`plan::ExecutionPlan`] (usually produced by an
//! upstream planner), the [`orchestrator::Orchestrator`] runs it step by
//! step against a graph catalog and an LLM provider pool, and the result
//! comes back as a single typed [`response::ExecutionOutcome`].

pub mod config;
pub mod orchestrator;
pub mod plan;
pub mod response;
pub mod tasks;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, LoggingConfig,
    ProviderName, ProviderSettings, ServerConfig,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use plan::{
    ArgValue, ExecutionLogEntry, ExecutionPlan, ExecutionState, FailurePolicy, PlanError, Step,
    StepRef, StepResult, TaskSpec,
};
pub use response::{ExecutionOutcome, QueryResult, ResultKind};
pub use tasks::{TaskContext, TaskFault};
