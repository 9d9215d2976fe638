use relaycore::{InvocationFailure, ProviderError, ProviderHandle, Step};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Issues single step invocations and normalizes every fault into an
/// [`InvocationFailure`]. It never retries.
#[derive(Debug, Clone, Default)]
pub struct CapabilityInvoker {
    default_timeout: Option<Duration>,
}

impl CapabilityInvoker {
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self { default_timeout }
    }

    pub async fn invoke(
        &self,
        handle: &ProviderHandle,
        step: &Step,
        timeout_override: Option<Duration>,
    ) -> Result<serde_json::Value, InvocationFailure> {
        let limit = timeout_override.or(self.default_timeout);
        let start = Instant::now();

        // Run the call on its own task so a panicking provider surfaces as a join error
        let provider = Arc::clone(handle);
        let operation = step.operation.clone();
        let parameters = step.parameters.clone();
        let mut call = tokio::spawn(async move { provider.invoke(&operation, parameters).await });

        let joined = match limit {
            Some(duration) => match timeout(duration, &mut call).await {
                Ok(joined) => joined,
                Err(_) => {
                    call.abort();
                    let err = ProviderError::Timeout {
                        millis: duration.as_millis() as u64,
                    };
                    tracing::warn!("Step {} timed out", step);
                    return Err(failure(step, err.to_string()));
                }
            },
            None => call.await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match joined {
            Ok(Ok(result)) => {
                tracing::debug!("Step {} returned in {}ms", step, duration_ms);
                Ok(result)
            }
            Ok(Err(e)) => {
                tracing::warn!("Step {} failed after {}ms: {}", step, duration_ms, e);
                Err(failure(step, e.to_string()))
            }
            Err(e) => {
                tracing::error!("Step {} aborted: {}", step, e);
                Err(failure(step, format!("provider task aborted: {}", e)))
            }
        }
    }
}

fn failure(step: &Step, message: String) -> InvocationFailure {
    InvocationFailure::new(step.provider.clone(), step.operation.clone(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaycore::{Parameters, Provider};
    use serde_json::json;

    struct ScriptedProvider;

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(
            &self,
            operation: &str,
            parameters: Parameters,
        ) -> Result<serde_json::Value, ProviderError> {
            match operation {
                "echo" => Ok(serde_json::Value::Object(parameters)),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!("late"))
                }
                "panic" => panic!("provider blew up"),
                other => Err(ProviderError::UnknownOperation(other.to_string())),
            }
        }
    }

    fn handle() -> ProviderHandle {
        Arc::new(ScriptedProvider)
    }

    #[tokio::test]
    async fn passes_result_through() {
        let step = Step::new("scripted", "echo").with_param("x", 1);
        let result = CapabilityInvoker::default()
            .invoke(&handle(), &step, None)
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn provider_error_becomes_failure() {
        let step = Step::new("scripted", "missing");
        let failure = CapabilityInvoker::default()
            .invoke(&handle(), &step, None)
            .await
            .unwrap_err();
        assert_eq!(failure.provider, "scripted");
        assert_eq!(failure.operation, "missing");
        assert!(failure.message.contains("Unknown operation"));
    }

    #[tokio::test]
    async fn timeout_becomes_failure() {
        let step = Step::new("scripted", "slow");
        let invoker = CapabilityInvoker::new(Some(Duration::from_secs(30)));
        let failure = invoker
            .invoke(&handle(), &step, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(failure.message.contains("Timeout after 20ms"));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let step = Step::new("scripted", "panic");
        let failure = CapabilityInvoker::default()
            .invoke(&handle(), &step, None)
            .await
            .unwrap_err();
        assert!(failure.message.contains("aborted"));
    }
}
