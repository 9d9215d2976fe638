//! Provider transports and configuration
//!
//! Turns an [`OrchestratorConfig`] into a populated [`ProviderRegistry`]:
//! HTTP services, child processes speaking JSON over stdio and the
//! in-process `data`, `analysis`, `visualization` and `reporting` providers.

mod builtin;
mod config;
mod http;
mod oracle;
mod process;

pub use builtin::{
    AnalysisProvider, BuiltinProviderFactory, DataProvider, ReportingProvider, VisualizationProvider,
};
pub use config::{OrchestratorConfig, PlannerSpec, ProviderSpec};
pub use http::{HttpProvider, HttpProviderFactory};
pub use oracle::ProviderOracle;
pub use process::{ProcessProvider, ProcessProviderFactory};

use relaycore::OrchestratorError;
use relayruntime::{Orchestrator, ProviderRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Register one factory per configured provider
pub fn register_from_config(
    registry: &mut ProviderRegistry,
    config: &OrchestratorConfig,
) -> Result<(), OrchestratorError> {
    for (name, spec) in &config.providers {
        match spec {
            ProviderSpec::Http {
                base_url,
                health_path,
                headers,
                operations,
            } => registry.register(Arc::new(HttpProviderFactory {
                name: name.clone(),
                base_url: base_url.clone(),
                health_path: health_path.clone(),
                headers: headers.clone(),
                operations: operations.clone(),
            })),
            ProviderSpec::Process {
                command,
                args,
                env,
                operations,
            } => registry.register(Arc::new(ProcessProviderFactory {
                name: name.clone(),
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
                operations: operations.clone(),
            })),
            ProviderSpec::Builtin { kind } => {
                let kind = kind.as_deref().unwrap_or(name);
                let factory = BuiltinProviderFactory::new(name.clone(), kind).ok_or_else(|| {
                    OrchestratorError::Configuration(format!(
                        "provider '{}': no built-in provider named '{}'",
                        name, kind
                    ))
                })?;
                registry.register(Arc::new(factory));
            }
        }
    }
    Ok(())
}

/// Build a registry holding every provider in `config`
pub fn build_registry(config: &OrchestratorConfig) -> Result<Arc<ProviderRegistry>, OrchestratorError> {
    let mut registry = ProviderRegistry::new();
    register_from_config(&mut registry, config)?;
    Ok(Arc::new(registry))
}

/// Orchestrator plus the planning oracle named in `config`, if any
pub fn build_orchestrator(
    config: &OrchestratorConfig,
) -> Result<(Arc<Orchestrator>, Option<ProviderOracle>), OrchestratorError> {
    config.validate()?;
    let registry = build_registry(config)?;
    let timeout = config.runtime.invocation_timeout_ms.map(Duration::from_millis);
    let oracle = config.planner.as_ref().map(|planner| {
        ProviderOracle::new(registry.clone(), &planner.provider, &planner.operation).with_timeout(timeout)
    });
    let orchestrator = Arc::new(Orchestrator::new(registry, config.runtime.clone()));
    Ok((orchestrator, oracle))
}
