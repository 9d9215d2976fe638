use async_trait::async_trait;
use relaycore::{Parameters, PlanRequest, PlanningOracle, ProviderError, Step, PLAN_FORMAT};
use relayruntime::{CapabilityInvoker, ProviderRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Planning oracle backed by an operation of a registered provider.
///
/// The provider receives `task_description`, `available_data`,
/// `available_servers` and the `plan_format` it must answer in, and replies
/// with plan text, either as a bare string or as an object carrying a
/// `text` field. Calls go through a [`CapabilityInvoker`] so the runtime's
/// invocation timeout bounds planning too.
pub struct ProviderOracle {
    registry: Arc<ProviderRegistry>,
    invoker: CapabilityInvoker,
    provider: String,
    operation: String,
}

impl ProviderOracle {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        provider: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            invoker: CapabilityInvoker::default(),
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// Bound each planning call by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invoker = CapabilityInvoker::new(timeout);
        self
    }
}

#[async_trait]
impl PlanningOracle for ProviderOracle {
    async fn plan(&self, request: &PlanRequest) -> Result<String, ProviderError> {
        let handle = self
            .registry
            .resolve(&self.provider)
            .await
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        let servers: Parameters = request
            .providers
            .iter()
            .map(|summary| (summary.name.clone(), json!(summary.operations)))
            .collect();
        let step = Step::new(&self.provider, &self.operation)
            .with_param("task_description", request.task.as_str())
            .with_param("available_data", request.available_data.clone())
            .with_param("available_servers", Value::Object(servers))
            .with_param("plan_format", PLAN_FORMAT);

        tracing::debug!(provider = %self.provider, "requesting plan for: {}", request.task);
        let reply = self
            .invoker
            .invoke(&handle, &step, None)
            .await
            .map_err(|failure| ProviderError::ExecutionFailed(failure.message))?;

        Ok(match reply {
            Value::String(text) => text,
            Value::Object(mut map) => match map.remove("text") {
                Some(Value::String(text)) => text,
                _ => Value::Object(map).to_string(),
            },
            other => other.to_string(),
        })
    }
}
