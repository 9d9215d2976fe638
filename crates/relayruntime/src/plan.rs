use crate::registry::ProviderRegistry;
use async_trait::async_trait;
use relaycore::{OrchestratorError, Parameters, PlanRequest, PlanningOracle, ProviderError, Step};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PlanDocument {
    steps: Vec<PlannedStep>,
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    server: String,
    tool: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

/// Parse oracle output into steps.
///
/// Accepts bare JSON or JSON inside a fenced block (```json ... ```).
pub fn parse_plan(text: &str) -> Result<Vec<Step>, OrchestratorError> {
    let document: PlanDocument = serde_json::from_str(extract_json(text))
        .map_err(|e| OrchestratorError::PlanValidation(format!("malformed plan: {}", e)))?;

    if document.steps.is_empty() {
        return Err(OrchestratorError::PlanValidation(
            "plan contains no steps".to_string(),
        ));
    }

    document
        .steps
        .into_iter()
        .enumerate()
        .map(|(index, planned)| {
            let parameters = match planned.parameters {
                serde_json::Value::Null => Parameters::new(),
                serde_json::Value::Object(map) => map,
                _ => {
                    return Err(OrchestratorError::PlanValidation(format!(
                        "step {} ({}.{}): parameters must be an object",
                        index, planned.server, planned.tool
                    )))
                }
            };
            Ok(Step {
                provider: planned.server,
                operation: planned.tool,
                parameters,
            })
        })
        .collect()
}

/// Reject plans naming providers or operations the registry does not know
pub fn validate_plan(steps: &[Step], registry: &ProviderRegistry) -> Result<(), OrchestratorError> {
    for (index, step) in steps.iter().enumerate() {
        if !registry.contains(&step.provider) {
            return Err(OrchestratorError::PlanValidation(format!(
                "step {}: unknown provider '{}'",
                index, step.provider
            )));
        }
        if !registry.has_operation(&step.provider, &step.operation) {
            return Err(OrchestratorError::PlanValidation(format!(
                "step {}: provider '{}' has no operation '{}'",
                index, step.provider, step.operation
            )));
        }
    }
    Ok(())
}

fn extract_json(text: &str) -> &str {
    let fenced = text
        .find("```json")
        .map(|start| start + "```json".len())
        .or_else(|| text.find("```").map(|start| start + 3));

    if let Some(body_start) = fenced {
        let body = &text[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    text.trim()
}

/// Oracle that always answers with the same plan text (plan files, tests)
pub struct StaticPlanOracle {
    text: String,
}

impl StaticPlanOracle {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl PlanningOracle for StaticPlanOracle {
    async fn plan(&self, _request: &PlanRequest) -> Result<String, ProviderError> {
        Ok(self.text.clone())
    }
}
