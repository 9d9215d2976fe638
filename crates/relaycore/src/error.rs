use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {provider} unavailable: {source}")]
    ProviderUnavailable {
        provider: String,
        source: ProviderError,
    },

    #[error(transparent)]
    Invocation(#[from] InvocationFailure),

    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Orchestrator is shut down")]
    ShutDown,
}

/// Errors raised by a provider while connecting or serving an operation.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid parameter '{field}': {reason}")]
    InvalidParameters { field: String, reason: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },
}

impl ProviderError {
    pub fn missing(field: &str) -> Self {
        ProviderError::InvalidParameters {
            field: field.to_string(),
            reason: "missing".to_string(),
        }
    }
}

/// Uniform failure of a single step invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{provider}.{operation} failed: {message}")]
pub struct InvocationFailure {
    pub provider: String,
    pub operation: String,
    pub message: String,
}

impl InvocationFailure {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}
