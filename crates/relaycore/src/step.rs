use crate::Parameters;
use serde::{Deserialize, Serialize};

/// Parameter value replaced with the previous step's whole result
pub const PRIOR_OUTPUT: &str = "$prior";

/// Parameter that receives the `output` field of a completed `data` step
pub const DATA_INPUT: &str = "data_input";

/// One invocation of a named operation on a named provider.
///
/// Steps are never mutated once queued; the `with_*` methods build a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub provider: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Step {
    pub fn new(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// History label, `"{provider}.{operation}"`
    pub fn label(&self) -> String {
        format!("{}.{}", self.provider, self.operation)
    }

    /// Same provider and operation with `overrides` merged over the parameters
    pub fn with_overrides(&self, overrides: &Parameters) -> Step {
        let mut parameters = self.parameters.clone();
        for (key, value) in overrides {
            parameters.insert(key.clone(), value.clone());
        }
        Step {
            provider: self.provider.clone(),
            operation: self.operation.clone(),
            parameters,
        }
    }

    /// Rewrite `$prior` / `$prior.<path>` parameters with the previous result.
    ///
    /// Placeholders that cannot be satisfied are left as they are.
    pub fn with_prior_output(&self, prior: Option<&serde_json::Value>) -> Step {
        let Some(prior) = prior else {
            return self.clone();
        };
        let parameters = self
            .parameters
            .iter()
            .map(|(key, value)| (key.clone(), substitute(value, prior)))
            .collect();
        Step {
            provider: self.provider.clone(),
            operation: self.operation.clone(),
            parameters,
        }
    }

    /// Replace an existing `data_input` parameter with `output`.
    ///
    /// Steps without the parameter come back unchanged.
    pub fn with_data_input(&self, output: &serde_json::Value) -> Step {
        let mut step = self.clone();
        if let Some(slot) = step.parameters.get_mut(DATA_INPUT) {
            *slot = output.clone();
        }
        step
    }

    /// True if any parameter still carries a prior-output placeholder
    pub fn references_prior_output(&self) -> bool {
        self.parameters.values().any(has_placeholder)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.provider, self.operation)
    }
}

fn substitute(value: &serde_json::Value, prior: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => match placeholder_path(s) {
            Some(path) => lookup(prior, path).cloned().unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| substitute(v, prior)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, prior)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn has_placeholder(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => placeholder_path(s).is_some(),
        serde_json::Value::Array(items) => items.iter().any(has_placeholder),
        serde_json::Value::Object(map) => map.values().any(has_placeholder),
        _ => false,
    }
}

/// `"$prior"` -> `Some("")`, `"$prior.a.b"` -> `Some("a.b")`
fn placeholder_path(s: &str) -> Option<&str> {
    let rest = s.strip_prefix(PRIOR_OUTPUT)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('.')
    }
}

/// Walk a dotted path through objects (and arrays by index)
pub fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
