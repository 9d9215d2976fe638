//! Core abstractions for the relay orchestrator
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: steps, workflow records, lifecycle events and the
//! provider boundary. It does not execute anything itself.

mod error;
pub mod events;
mod provider;
mod step;
mod workflow;

pub use error::{InvocationFailure, OrchestratorError, ProviderError};
pub use events::*;
pub use provider::{
    Parameters, PlanRequest, PlanningOracle, PLAN_FORMAT, Provider, ProviderHandle, ProviderSummary,
};
pub use step::{lookup, Step, DATA_INPUT, PRIOR_OUTPUT};
pub use workflow::{
    ExecutionOptions, StatusSnapshot, WorkflowId, WorkflowRecord, WorkflowStatus, WorkflowType,
};

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
