use crate::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameter bag passed across the provider boundary
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Shared, initialized connection to a provider
pub type ProviderHandle = Arc<dyn Provider>;

/// Core trait that every capability provider implements
#[async_trait]
pub trait Provider: Send + Sync {
    /// Logical provider name (e.g., "data", "analysis")
    fn name(&self) -> &str;

    /// Run one named operation with the given parameters
    async fn invoke(
        &self,
        operation: &str,
        parameters: Parameters,
    ) -> Result<serde_json::Value, ProviderError>;
}

/// Name and operation catalog of a configured provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub name: String,
    pub operations: Vec<String>,
}

/// Plan format and data-passing rules, sent to planners alongside the task
pub const PLAN_FORMAT: &str = r#"Answer with a JSON object {"steps": [{"server": "<provider>", "tool": "<operation>", "parameters": {...}}]}, optionally inside a ```json block. Steps run in order. A string parameter "$prior" is replaced with the whole result of the previous step, and "$prior.<field>" (dotted path) with one field of it. When a "data" step returns an "output" field, every later step that declares a "data_input" parameter receives that output."#;

/// Input handed to a planning oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub task: String,
    pub available_data: serde_json::Value,
    pub providers: Vec<ProviderSummary>,
}

/// External collaborator that turns a task description into a plan.
///
/// The returned text must contain a JSON object of the shape
/// `{"steps": [{"server": ..., "tool": ..., "parameters": {...}}]}`, either
/// bare or inside a fenced `json` block.
#[async_trait]
pub trait PlanningOracle: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<String, ProviderError>;
}
