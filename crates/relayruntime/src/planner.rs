//! Static planning tables.
//!
//! Each workflow type has a seed list of step templates and a continuation
//! table keyed by the label of the step that just completed. Templates bind
//! their parameters from the input payload, from the results gathered so far
//! or from literals, so the rules stay data and can be tested without
//! executing.

use relaycore::{lookup, Parameters, Step, WorkflowType};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

const PREPARE: &str = "data.fetch_and_prepare_data";
const ANALYZE: &str = "analysis.analyze_data";
const VISUALIZE: &str = "visualization.create_visualizations";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("missing required input field '{0}'")]
    MissingInput(String),

    #[error("result of {step} has no field '{field}'")]
    MissingResultField { step: String, field: String },
}

/// Source of one template parameter
#[derive(Debug, Clone)]
pub enum Binding {
    /// Required field of the input payload
    Input(String),
    /// Input payload field with a fallback value
    InputOr(String, Value),
    /// Field (dotted path) of the triggering step's result
    Result(String),
    /// Field of an earlier step's result, by label; `""` takes the whole result
    StepResult(String, String),
    /// `true` when an earlier step's result carries a non-empty field
    Flag(String, String),
    /// Text with `{field}` replaced by input payload fields
    Format(String),
    Literal(Value),
}

/// Results visible to a template: everything completed so far plus the
/// label of the step that triggered the rule
#[derive(Debug, Clone, Copy)]
pub struct Completed<'a> {
    pub label: &'a str,
    pub results: &'a HashMap<String, Value>,
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn step_field(
    completed: Option<Completed<'_>>,
    label: &str,
    path: &str,
) -> Result<Value, BindingError> {
    completed
        .and_then(|c| c.results.get(label))
        .and_then(|result| lookup(result, path))
        .cloned()
        .ok_or_else(|| BindingError::MissingResultField {
            step: label.to_string(),
            field: path.to_string(),
        })
}

fn format_input(template: &str, payload: &Value) -> Result<String, BindingError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let key = &rest[open + 1..open + close];
        let value = payload
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| BindingError::MissingInput(key.to_string()))?;
        out.push_str(&rest[..open]);
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct StepTemplate {
    pub provider: String,
    pub operation: String,
    pub bindings: Vec<(String, Binding)>,
}

impl StepTemplate {
    pub fn new(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, parameter: impl Into<String>, binding: Binding) -> Self {
        self.bindings.push((parameter.into(), binding));
        self
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.provider, self.operation)
    }

    /// Build a concrete step from the payload and, for continuations, the
    /// results completed so far
    pub fn instantiate(
        &self,
        payload: &Value,
        completed: Option<Completed<'_>>,
    ) -> Result<Step, BindingError> {
        let mut parameters = Parameters::new();
        for (name, binding) in &self.bindings {
            let value = match binding {
                Binding::Input(key) => payload
                    .get(key)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| BindingError::MissingInput(key.clone()))?,
                Binding::InputOr(key, fallback) => payload
                    .get(key)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| fallback.clone()),
                Binding::Result(path) => {
                    let label = completed.map(|c| c.label).unwrap_or("<none>");
                    step_field(completed, label, path)?
                }
                Binding::StepResult(label, path) => step_field(completed, label, path)?,
                Binding::Flag(label, path) => Value::Bool(
                    completed
                        .and_then(|c| c.results.get(label))
                        .and_then(|result| lookup(result, path))
                        .is_some_and(|v| !is_empty(v)),
                ),
                Binding::Format(template) => Value::String(format_input(template, payload)?),
                Binding::Literal(value) => value.clone(),
            };
            parameters.insert(name.clone(), value);
        }

        Ok(Step {
            provider: self.provider.clone(),
            operation: self.operation.clone(),
            parameters,
        })
    }
}

/// Seed and continuation tables for the static workflow types
#[derive(Debug, Clone, Default)]
pub struct Planner {
    seeds: HashMap<WorkflowType, Vec<StepTemplate>>,
    rules: HashMap<(WorkflowType, String), Vec<StepTemplate>>,
}

impl Planner {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in tables for data processing, analysis, reporting and the
    /// four-provider analysis pipeline
    pub fn standard() -> Self {
        Self::empty()
            .with_seed(
                WorkflowType::DataProcessing,
                StepTemplate::new("data", "load_data").bind("source", Binding::Input("source".into())),
            )
            .with_seed(
                WorkflowType::Analysis,
                StepTemplate::new("data", "fetch_dataset")
                    .bind("dataset_id", Binding::Input("dataset_id".into())),
            )
            .with_seed(
                WorkflowType::ReportGeneration,
                StepTemplate::new("data", "get_report_data")
                    .bind("report_type", Binding::Input("report_type".into())),
            )
            .with_rule(
                WorkflowType::DataProcessing,
                "data.load_data",
                StepTemplate::new("data", "process_data")
                    .bind("data", Binding::Result("data".into()))
                    .bind(
                        "operations",
                        Binding::InputOr("operations".into(), json!(["clean", "transform"])),
                    ),
            )
            .with_rule(
                WorkflowType::DataProcessing,
                "data.process_data",
                StepTemplate::new("analysis", "analyze_processed_data")
                    .bind("data", Binding::Result("processed_data".into()))
                    .bind("metrics", Binding::InputOr("metrics".into(), json!(["summary"]))),
            )
            .with_pipeline()
    }

    fn with_pipeline(self) -> Self {
        let pipeline = WorkflowType::AnalysisPipeline;
        self.with_seed(
            pipeline,
            StepTemplate::new("data", "fetch_and_prepare_data")
                .bind("source", Binding::Input("source".into()))
                .bind(
                    "preprocessing",
                    Binding::InputOr("preprocessing".into(), json!(["clean", "normalize"])),
                ),
        )
        .with_rule(
            pipeline,
            PREPARE,
            StepTemplate::new("analysis", "analyze_data")
                .bind("data", Binding::Result("prepared_data".into()))
                .bind("metrics", Binding::InputOr("metrics".into(), json!(["summary", "trends"])))
                .bind("models", Binding::InputOr("models".into(), json!(["regression"])))
                .bind("handle_missing", Binding::Flag(PREPARE.into(), "warnings".into())),
        )
        .with_rule(
            pipeline,
            ANALYZE,
            StepTemplate::new("visualization", "create_visualizations")
                .bind("data", Binding::StepResult(PREPARE.into(), "prepared_data".into()))
                .bind("analysis", Binding::Result(String::new()))
                .bind(
                    "types",
                    Binding::InputOr("visualizations".into(), json!(["bar", "line", "scatter"])),
                ),
        )
        .with_rule(
            pipeline,
            VISUALIZE,
            StepTemplate::new("reporting", "generate_report")
                .bind("title", Binding::Format("Analysis Report: {source}".into()))
                .bind("data_summary", Binding::StepResult(PREPARE.into(), "summary".into()))
                .bind("analysis_results", Binding::StepResult(ANALYZE.into(), String::new()))
                .bind("visualizations", Binding::Result(String::new()))
                .bind("format", Binding::InputOr("output_format".into(), json!("pdf"))),
        )
    }

    pub fn with_seed(mut self, workflow_type: WorkflowType, template: StepTemplate) -> Self {
        self.seeds.entry(workflow_type).or_default().push(template);
        self
    }

    pub fn with_rule(
        mut self,
        workflow_type: WorkflowType,
        trigger: impl Into<String>,
        template: StepTemplate,
    ) -> Self {
        self.rules
            .entry((workflow_type, trigger.into()))
            .or_default()
            .push(template);
        self
    }

    /// Steps a new workflow of `workflow_type` starts with
    pub fn initial_steps(
        &self,
        workflow_type: WorkflowType,
        payload: &Value,
    ) -> Result<Vec<Step>, BindingError> {
        self.seeds
            .get(&workflow_type)
            .map(|templates| {
                templates
                    .iter()
                    .map(|t| t.instantiate(payload, None))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Steps to append after `completed_label` finished.
    ///
    /// `results` already holds the result of `completed_label`.
    pub fn continuation(
        &self,
        workflow_type: WorkflowType,
        completed_label: &str,
        payload: &Value,
        results: &HashMap<String, Value>,
    ) -> Result<Vec<Step>, BindingError> {
        let completed = Completed {
            label: completed_label,
            results,
        };
        match self.rules.get(&(workflow_type, completed_label.to_string())) {
            Some(templates) => templates
                .iter()
                .map(|t| t.instantiate(payload, Some(completed)))
                .collect(),
            None => Ok(Vec::new()),
        }
    }
}
