use async_trait::async_trait;
use relaycore::{Parameters, Provider, ProviderError, ProviderHandle};
use relayruntime::{ProviderFactory, ProviderMetadata};
use serde_json::{json, Value};
use std::sync::Arc;

const DATA_OPERATIONS: &[&str] = &[
    "load_data",
    "process_data",
    "fetch_dataset",
    "get_report_data",
    "fetch_and_prepare_data",
];
const ANALYSIS_OPERATIONS: &[&str] = &["analyze_processed_data", "analyze_data"];
const VISUALIZATION_OPERATIONS: &[&str] = &["create_visualizations"];
const REPORTING_OPERATIONS: &[&str] = &["generate_report"];
const CHART_TYPES: &[&str] = &["bar", "line", "scatter", "histogram"];

fn require_str<'a>(parameters: &'a Parameters, field: &str) -> Result<&'a str, ProviderError> {
    parameters
        .get(field)
        .ok_or_else(|| ProviderError::missing(field))?
        .as_str()
        .ok_or_else(|| ProviderError::InvalidParameters {
            field: field.to_string(),
            reason: "expected a string".to_string(),
        })
}

fn require_array<'a>(parameters: &'a Parameters, field: &str) -> Result<&'a Vec<Value>, ProviderError> {
    parameters
        .get(field)
        .ok_or_else(|| ProviderError::missing(field))?
        .as_array()
        .ok_or_else(|| ProviderError::InvalidParameters {
            field: field.to_string(),
            reason: "expected an array".to_string(),
        })
}

/// Names listed under `field`, or `default` when absent
fn name_list(parameters: &Parameters, field: &str, default: &[&str]) -> Result<Vec<String>, ProviderError> {
    match parameters.get(field) {
        None | Some(Value::Null) => Ok(default.iter().map(|s| s.to_string()).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| ProviderError::InvalidParameters {
                    field: field.to_string(),
                    reason: "expected a list of names".to_string(),
                })
            })
            .collect(),
        Some(_) => Err(ProviderError::InvalidParameters {
            field: field.to_string(),
            reason: "expected a list of names".to_string(),
        }),
    }
}

/// Deterministic sample rows for a key; the fourth row is left empty
fn sample_rows(key: &str) -> Vec<Value> {
    let seed: u32 = key.bytes().map(u32::from).sum();
    (0..8u32)
        .map(|i| {
            if i == 3 {
                Value::Null
            } else {
                json!(f64::from((seed + i * 37) % 100))
            }
        })
        .collect()
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Apply row operations in order; `field` names the parameter they came from
fn reshape(mut rows: Vec<Value>, operations: &[String], field: &str) -> Result<Vec<Value>, ProviderError> {
    for operation in operations {
        match operation.as_str() {
            "clean" => rows.retain(|row| !row.is_null()),
            "transform" => {
                rows = rows
                    .into_iter()
                    .map(|row| as_number(&row).map(|n| json!(n)).unwrap_or(row))
                    .collect()
            }
            "normalize" => {
                let numbers: Vec<f64> = rows.iter().filter_map(as_number).collect();
                let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let span = max - min;
                rows = rows
                    .into_iter()
                    .map(|row| match as_number(&row) {
                        Some(n) if span > 0.0 => json!((n - min) / span),
                        Some(_) => json!(0.0),
                        None => row,
                    })
                    .collect();
            }
            "sort" => rows.sort_by(|a, b| {
                as_number(a)
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&as_number(b).unwrap_or(f64::INFINITY))
            }),
            other => {
                return Err(ProviderError::InvalidParameters {
                    field: field.to_string(),
                    reason: format!("unsupported operation '{}'", other),
                })
            }
        }
    }
    Ok(rows)
}

/// Loads, reshapes and serves sample datasets
pub struct DataProvider;

impl DataProvider {
    fn process(&self, parameters: &Parameters) -> Result<Value, ProviderError> {
        let rows = require_array(parameters, "data")?.clone();
        let operations = name_list(parameters, "operations", &["clean", "transform"])?;
        let rows = reshape(rows, &operations, "operations")?;

        Ok(json!({
            "processed_data": rows,
            "operations_applied": operations,
        }))
    }

    /// Load a source and run its preprocessing, reporting gaps as warnings
    fn prepare(&self, parameters: &Parameters) -> Result<Value, ProviderError> {
        let source = require_str(parameters, "source")?;
        let preprocessing = name_list(parameters, "preprocessing", &["clean", "normalize"])?;

        let raw = sample_rows(source);
        let missing = raw.iter().filter(|row| row.is_null()).count();
        let prepared = reshape(raw.clone(), &preprocessing, "preprocessing")?;
        let dropped = raw.len() - prepared.len();

        let mut warnings = Vec::new();
        if dropped > 0 {
            warnings.push(format!("dropped {} empty rows from {}", dropped, source));
        } else if missing > 0 {
            warnings.push(format!("{} rows of {} have no value", missing, source));
        }

        Ok(json!({
            "prepared_data": prepared,
            "summary": {
                "source": source,
                "rows": prepared.len(),
                "dropped": dropped,
                "preprocessing": preprocessing,
            },
            "warnings": warnings,
        }))
    }
}

#[async_trait]
impl Provider for DataProvider {
    fn name(&self) -> &str {
        "data"
    }

    async fn invoke(&self, operation: &str, parameters: Parameters) -> Result<Value, ProviderError> {
        match operation {
            "load_data" => {
                let source = require_str(&parameters, "source")?;
                let rows = sample_rows(source);
                Ok(json!({ "source": source, "count": rows.len(), "data": rows }))
            }
            "process_data" => self.process(&parameters),
            "fetch_and_prepare_data" => self.prepare(&parameters),
            "fetch_dataset" => {
                let dataset_id = require_str(&parameters, "dataset_id")?;
                Ok(json!({ "dataset_id": dataset_id, "data": sample_rows(dataset_id) }))
            }
            "get_report_data" => {
                let report_type = require_str(&parameters, "report_type")?;
                let rows: Vec<Value> = sample_rows(report_type)
                    .into_iter()
                    .filter(|row| !row.is_null())
                    .collect();
                Ok(json!({ "report_type": report_type, "sections": ["overview", "details"], "data": rows }))
            }
            other => Err(ProviderError::UnknownOperation(other.to_string())),
        }
    }
}

fn metric(name: &str, numbers: &[f64]) -> Result<Value, ProviderError> {
    let value = match name {
        "summary" if numbers.is_empty() => json!({ "count": 0 }),
        "summary" => {
            let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
            let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let total: f64 = numbers.iter().sum();
            json!({
                "count": numbers.len(),
                "min": min,
                "max": max,
                "mean": total / numbers.len() as f64,
            })
        }
        "total" => json!(numbers.iter().sum::<f64>()),
        "trends" => {
            let change = match (numbers.first(), numbers.last()) {
                (Some(first), Some(last)) => last - first,
                _ => 0.0,
            };
            let direction = if change > 0.0 {
                "up"
            } else if change < 0.0 {
                "down"
            } else {
                "flat"
            };
            json!({ "direction": direction, "change": change })
        }
        other => {
            return Err(ProviderError::InvalidParameters {
                field: "metrics".to_string(),
                reason: format!("unsupported metric '{}'", other),
            })
        }
    };
    Ok(value)
}

/// Least-squares line through the series against its index
fn regression(numbers: &[f64]) -> Value {
    let n = numbers.len() as f64;
    if numbers.len() < 2 {
        return json!({ "slope": 0.0, "intercept": numbers.first().copied().unwrap_or(0.0) });
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = numbers.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in numbers.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    let slope = num / den;
    json!({ "slope": slope, "intercept": mean_y - slope * mean_x })
}

/// Computes metrics and simple models over numeric series
pub struct AnalysisProvider;

impl AnalysisProvider {
    fn analyze(&self, parameters: &Parameters) -> Result<Value, ProviderError> {
        let rows = require_array(parameters, "data")?;
        let handle_missing = parameters
            .get("handle_missing")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let gaps = rows.iter().filter(|row| as_number(row).is_none()).count();
        if gaps > 0 && !handle_missing {
            return Err(ProviderError::InvalidParameters {
                field: "data".to_string(),
                reason: format!("{} non-numeric rows; set handle_missing to skip them", gaps),
            });
        }
        let numbers: Vec<f64> = rows.iter().filter_map(as_number).collect();

        let mut metrics = serde_json::Map::new();
        for name in name_list(parameters, "metrics", &["summary", "trends"])? {
            let value = metric(&name, &numbers)?;
            metrics.insert(name, value);
        }

        let mut models = serde_json::Map::new();
        for name in name_list(parameters, "models", &["regression"])? {
            if name != "regression" {
                return Err(ProviderError::InvalidParameters {
                    field: "models".to_string(),
                    reason: format!("unsupported model '{}'", name),
                });
            }
            models.insert(name, regression(&numbers));
        }

        Ok(json!({ "metrics": metrics, "models": models, "skipped": gaps }))
    }
}

#[async_trait]
impl Provider for AnalysisProvider {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn invoke(&self, operation: &str, parameters: Parameters) -> Result<Value, ProviderError> {
        match operation {
            "analyze_processed_data" => {
                let numbers: Vec<f64> = require_array(&parameters, "data")?
                    .iter()
                    .filter_map(as_number)
                    .collect();
                let mut analysis = serde_json::Map::new();
                for name in name_list(&parameters, "metrics", &["summary"])? {
                    let value = metric(&name, &numbers)?;
                    analysis.insert(name, value);
                }
                Ok(json!({ "analysis": analysis }))
            }
            "analyze_data" => self.analyze(&parameters),
            other => Err(ProviderError::UnknownOperation(other.to_string())),
        }
    }
}

/// Describes charts for a numeric series
pub struct VisualizationProvider;

#[async_trait]
impl Provider for VisualizationProvider {
    fn name(&self) -> &str {
        "visualization"
    }

    async fn invoke(&self, operation: &str, parameters: Parameters) -> Result<Value, ProviderError> {
        if operation != "create_visualizations" {
            return Err(ProviderError::UnknownOperation(operation.to_string()));
        }

        let points = require_array(&parameters, "data")?.len();
        let annotated = parameters.get("analysis").is_some_and(|a| !a.is_null());
        let mut charts = Vec::new();
        for kind in name_list(&parameters, "types", &["bar", "line", "scatter"])? {
            if !CHART_TYPES.contains(&kind.as_str()) {
                return Err(ProviderError::InvalidParameters {
                    field: "types".to_string(),
                    reason: format!("unsupported chart type '{}'", kind),
                });
            }
            charts.push(json!({
                "type": kind,
                "points": points,
                "annotated": annotated,
            }));
        }

        Ok(json!({ "charts": charts }))
    }
}

/// Assembles report documents from earlier results
pub struct ReportingProvider;

#[async_trait]
impl Provider for ReportingProvider {
    fn name(&self) -> &str {
        "reporting"
    }

    async fn invoke(&self, operation: &str, parameters: Parameters) -> Result<Value, ProviderError> {
        if operation != "generate_report" {
            return Err(ProviderError::UnknownOperation(operation.to_string()));
        }

        let title = require_str(&parameters, "title")?;
        let format = match parameters.get("format") {
            None | Some(Value::Null) => "pdf",
            Some(value) => value.as_str().ok_or_else(|| ProviderError::InvalidParameters {
                field: "format".to_string(),
                reason: "expected a string".to_string(),
            })?,
        };
        if !["pdf", "html", "markdown"].contains(&format) {
            return Err(ProviderError::InvalidParameters {
                field: "format".to_string(),
                reason: format!("unsupported format '{}'", format),
            });
        }

        let sections: Vec<&str> = ["data_summary", "analysis_results", "visualizations"]
            .into_iter()
            .filter(|key| parameters.get(*key).is_some_and(|v| !v.is_null()))
            .collect();
        let slug: String = title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let slug = slug.split('-').filter(|part| !part.is_empty()).collect::<Vec<_>>().join("-");

        Ok(json!({
            "title": title,
            "format": format,
            "sections": sections,
            "report_url": format!("reports/{}.{}", slug, format),
        }))
    }
}

/// Factory for the in-process providers
pub struct BuiltinProviderFactory {
    name: String,
    kind: BuiltinKind,
}

#[derive(Debug, Clone, Copy)]
enum BuiltinKind {
    Data,
    Analysis,
    Visualization,
    Reporting,
}

impl BuiltinProviderFactory {
    /// `None` when `kind` names no built-in provider
    pub fn new(name: impl Into<String>, kind: &str) -> Option<Self> {
        let kind = match kind {
            "data" => BuiltinKind::Data,
            "analysis" => BuiltinKind::Analysis,
            "visualization" => BuiltinKind::Visualization,
            "reporting" => BuiltinKind::Reporting,
            _ => return None,
        };
        Some(Self {
            name: name.into(),
            kind,
        })
    }
}

#[async_trait]
impl ProviderFactory for BuiltinProviderFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<String> {
        let operations = match self.kind {
            BuiltinKind::Data => DATA_OPERATIONS,
            BuiltinKind::Analysis => ANALYSIS_OPERATIONS,
            BuiltinKind::Visualization => VISUALIZATION_OPERATIONS,
            BuiltinKind::Reporting => REPORTING_OPERATIONS,
        };
        operations.iter().map(|op| op.to_string()).collect()
    }

    async fn connect(&self) -> Result<ProviderHandle, ProviderError> {
        Ok(match self.kind {
            BuiltinKind::Data => Arc::new(DataProvider),
            BuiltinKind::Analysis => Arc::new(AnalysisProvider),
            BuiltinKind::Visualization => Arc::new(VisualizationProvider),
            BuiltinKind::Reporting => Arc::new(ReportingProvider),
        })
    }

    fn metadata(&self) -> ProviderMetadata {
        let description = match self.kind {
            BuiltinKind::Data => "Sample datasets and row processing",
            BuiltinKind::Analysis => "Summary metrics and regression over numeric rows",
            BuiltinKind::Visualization => "Chart descriptions for numeric rows",
            BuiltinKind::Reporting => "Report documents from earlier results",
        };
        ProviderMetadata {
            description: description.to_string(),
            transport: "builtin".to_string(),
        }
    }
}
