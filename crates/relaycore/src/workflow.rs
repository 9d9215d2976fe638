use crate::{OrchestratorError, Parameters, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Closed set of workflow kinds; selects the planner rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    DataProcessing,
    Analysis,
    ReportGeneration,
    /// Prepare, analyze, visualize and report across four providers
    AnalysisPipeline,
    /// Plan supplied by a planning oracle; never accepted by name at submission
    Adaptive,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::DataProcessing => "data_processing",
            WorkflowType::Analysis => "analysis",
            WorkflowType::ReportGeneration => "report_generation",
            WorkflowType::AnalysisPipeline => "analysis_pipeline",
            WorkflowType::Adaptive => "adaptive",
        }
    }

    /// Types that can be submitted by name
    pub fn submittable() -> [WorkflowType; 4] {
        [
            WorkflowType::DataProcessing,
            WorkflowType::Analysis,
            WorkflowType::ReportGeneration,
            WorkflowType::AnalysisPipeline,
        ]
    }
}

impl FromStr for WorkflowType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowType::submittable()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OrchestratorError::UnknownWorkflowType(s.to_string()))
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initializing,
    Running,
    Retrying,
    Error,
    Completed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Initializing => "initializing",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Retrying => "retrying",
            WorkflowStatus::Error => "error",
            WorkflowStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Caller-controlled execution knobs read from the input payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub retry_on_error: bool,
    pub retry_parameters: Parameters,
    /// `"provider.operation"` the retry parameters were written for
    pub retry_step: Option<String>,
    pub invocation_timeout_ms: Option<u64>,
}

impl ExecutionOptions {
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, OrchestratorError> {
        let mut options = ExecutionOptions::default();

        match payload.get("retry_on_error") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Bool(b)) => options.retry_on_error = *b,
            Some(_) => return Err(invalid("retry_on_error must be a boolean")),
        }

        match payload.get("retry_parameters") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(map)) => options.retry_parameters = map.clone(),
            Some(_) => return Err(invalid("retry_parameters must be an object")),
        }

        match payload.get("retry_step") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::String(label)) if label.contains('.') => {
                options.retry_step = Some(label.clone());
            }
            Some(_) => {
                return Err(invalid(
                    "retry_step must be a \"provider.operation\" string",
                ))
            }
        }

        match payload.get("invocation_timeout_ms") {
            None | Some(serde_json::Value::Null) => {}
            Some(v) => {
                let millis = v
                    .as_u64()
                    .filter(|millis| *millis > 0)
                    .ok_or_else(|| invalid("invocation_timeout_ms must be a positive integer"))?;
                options.invocation_timeout_ms = Some(millis);
            }
        }

        Ok(options)
    }
}

fn invalid(message: &str) -> OrchestratorError {
    OrchestratorError::InvalidInput(message.to_string())
}

/// Mutable record of one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_payload: serde_json::Value,
    pub options: ExecutionOptions,
    pub description: Option<String>,
    pub pending_steps: VecDeque<Step>,
    pub current_step: Option<Step>,
    pub failed_step: Option<Step>,
    pub completed_step_labels: Vec<String>,
    pub results: HashMap<String, serde_json::Value>,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl WorkflowRecord {
    pub fn new(
        workflow_type: WorkflowType,
        input_payload: serde_json::Value,
        options: ExecutionOptions,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_type,
            status: WorkflowStatus::Initializing,
            created_at: Utc::now(),
            completed_at: None,
            input_payload,
            options,
            description: None,
            pending_steps: steps.into(),
            current_step: None,
            failed_step: None,
            completed_step_labels: Vec::new(),
            results: HashMap::new(),
            last_error: None,
            retry_count: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Result of the most recently completed step
    pub fn prior_result(&self) -> Option<&serde_json::Value> {
        self.completed_step_labels
            .last()
            .and_then(|label| self.results.get(label))
    }

    /// No further events change this record
    pub fn is_settled(&self) -> bool {
        match self.status {
            WorkflowStatus::Completed => true,
            WorkflowStatus::Error => self.current_step.is_none(),
            _ => false,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0) as u64
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            workflow_id: self.id,
            workflow_type: self.workflow_type,
            status: self.status,
            steps_completed: self.completed_step_labels.clone(),
            current_step: self.current_step.as_ref().map(Step::label),
            pending_count: self.pending_steps.len(),
            elapsed_ms: self.elapsed_ms(),
            last_error: self.last_error.clone(),
            retry_count: self.retry_count,
        }
    }
}

/// Point-in-time view returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub workflow_id: WorkflowId,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub steps_completed: Vec<String>,
    pub current_step: Option<String>,
    pub pending_count: usize,
    pub elapsed_ms: u64,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_types_only() {
        assert_eq!(
            "data_processing".parse::<WorkflowType>().unwrap(),
            WorkflowType::DataProcessing
        );
        assert_eq!(
            "report_generation".parse::<WorkflowType>().unwrap(),
            WorkflowType::ReportGeneration
        );
        assert_eq!(
            "analysis_pipeline".parse::<WorkflowType>().unwrap(),
            WorkflowType::AnalysisPipeline
        );
        assert!(matches!(
            "bogus".parse::<WorkflowType>(),
            Err(OrchestratorError::UnknownWorkflowType(t)) if t == "bogus"
        ));
        assert!("adaptive".parse::<WorkflowType>().is_err());
    }

    #[test]
    fn options_default_when_absent() {
        let options = ExecutionOptions::from_payload(&json!({"source": "X"})).unwrap();
        assert_eq!(options, ExecutionOptions::default());
    }

    #[test]
    fn options_read_retry_fields() {
        let options = ExecutionOptions::from_payload(&json!({
            "retry_on_error": true,
            "retry_parameters": {"source": "backup"},
            "retry_step": "data.load_data",
            "invocation_timeout_ms": 250
        }))
        .unwrap();
        assert!(options.retry_on_error);
        assert_eq!(options.retry_parameters["source"], json!("backup"));
        assert_eq!(options.retry_step.as_deref(), Some("data.load_data"));
        assert_eq!(options.invocation_timeout_ms, Some(250));
    }

    #[test]
    fn options_reject_malformed_fields() {
        for payload in [
            json!({"retry_on_error": "yes"}),
            json!({"retry_parameters": [1, 2]}),
            json!({"retry_step": "load_data"}),
            json!({"invocation_timeout_ms": -5}),
            json!({"invocation_timeout_ms": 0}),
        ] {
            assert!(matches!(
                ExecutionOptions::from_payload(&payload),
                Err(OrchestratorError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn snapshot_reflects_record() {
        let mut record = WorkflowRecord::new(
            WorkflowType::Analysis,
            json!({}),
            ExecutionOptions::default(),
            vec![Step::new("data", "fetch_dataset"), Step::new("analysis", "run")],
        );
        record.current_step = record.pending_steps.pop_front();
        record.status = WorkflowStatus::Running;

        let snapshot = record.snapshot();
        assert_eq!(snapshot.status, WorkflowStatus::Running);
        assert_eq!(snapshot.current_step.as_deref(), Some("data.fetch_dataset"));
        assert_eq!(snapshot.pending_count, 1);
        assert!(snapshot.steps_completed.is_empty());
        assert!(!record.is_settled());
    }

    #[test]
    fn prior_result_follows_history() {
        let mut record = WorkflowRecord::new(
            WorkflowType::Analysis,
            json!({}),
            ExecutionOptions::default(),
            vec![],
        );
        assert!(record.prior_result().is_none());

        record.completed_step_labels.push("data.fetch_dataset".to_string());
        record
            .results
            .insert("data.fetch_dataset".to_string(), json!({"rows": 3}));
        assert_eq!(record.prior_result(), Some(&json!({"rows": 3})));
    }
}
