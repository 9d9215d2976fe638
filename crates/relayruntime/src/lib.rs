//! Workflow orchestration runtime
//!
//! This crate provides the execution engine: the provider registry, the
//! capability invoker, the workflow store, the planning tables and the
//! single event processor that drives every workflow's state machine.

mod invoker;
mod machine;
mod plan;
mod planner;
mod processor;
mod registry;
mod runtime;
mod store;

pub use invoker::CapabilityInvoker;
pub use machine::{apply, Effect};
pub use plan::{parse_plan, validate_plan, StaticPlanOracle};
pub use planner::{Binding, BindingError, Completed, Planner, StepTemplate};
pub use registry::{ProviderFactory, ProviderMetadata, ProviderRegistry};
pub use runtime::{Orchestrator, RuntimeConfig};
pub use store::WorkflowStore;
