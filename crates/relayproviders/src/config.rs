use relaycore::OrchestratorError;
use relayruntime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// How to reach one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ProviderSpec {
    /// `POST {base_url}/{operation}` with a JSON body
    Http {
        base_url: String,
        #[serde(default)]
        health_path: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        operations: Vec<String>,
    },
    /// Child process speaking line-delimited JSON over stdio
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        operations: Vec<String>,
    },
    /// In-process provider shipped with relay; `kind` defaults to the name
    Builtin {
        #[serde(default)]
        kind: Option<String>,
    },
}

/// Provider operation used as the planning oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSpec {
    pub provider: String,
    pub operation: String,
}

/// Everything needed to start an orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
    #[serde(default)]
    pub planner: Option<PlannerSpec>,
}

impl OrchestratorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, OrchestratorError> {
        let config: OrchestratorConfig = serde_json::from_str(text)
            .map_err(|e| OrchestratorError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if let Some(planner) = &self.planner {
            if !self.providers.contains_key(&planner.provider) {
                return Err(OrchestratorError::Configuration(format!(
                    "planner provider '{}' is not configured",
                    planner.provider
                )));
            }
        }
        for (name, spec) in &self.providers {
            let operations = match spec {
                ProviderSpec::Http { operations, .. } | ProviderSpec::Process { operations, .. } => {
                    operations
                }
                ProviderSpec::Builtin { .. } => continue,
            };
            if operations.is_empty() {
                return Err(OrchestratorError::Configuration(format!(
                    "provider '{}' declares no operations",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Example used by `relay init`: built-in data, analysis and
    /// visualization providers plus an HTTP reporting service
    pub fn example() -> Self {
        let mut providers = BTreeMap::new();
        for name in ["data", "analysis", "visualization"] {
            providers.insert(name.to_string(), ProviderSpec::Builtin { kind: None });
        }
        providers.insert(
            "reporting".to_string(),
            ProviderSpec::Http {
                base_url: "http://127.0.0.1:8081".to_string(),
                health_path: Some("/health".to_string()),
                headers: HashMap::new(),
                operations: vec!["generate_report".to_string()],
            },
        );
        Self {
            runtime: RuntimeConfig::default(),
            providers,
            planner: None,
        }
    }
}

impl Default for OrchestratorConfig {
    /// The built-in providers only
    fn default() -> Self {
        let providers = ["data", "analysis", "visualization", "reporting"]
            .into_iter()
            .map(|name| (name.to_string(), ProviderSpec::Builtin { kind: None }))
            .collect();
        Self {
            runtime: RuntimeConfig::default(),
            providers,
            planner: None,
        }
    }
}
