// crates/relayruntime/tests/orchestrator_test.rs

use async_trait::async_trait;
use relaycore::{
    OrchestratorError, Parameters, Provider, ProviderError, ProviderHandle, WorkflowStatus,
};
use relayruntime::{Orchestrator, ProviderFactory, ProviderRegistry, RuntimeConfig, StaticPlanOracle};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

/// Provider whose operations answer from a fixed script
struct ScriptedProvider {
    name: String,
    calls: Arc<Mutex<Vec<(String, Parameters)>>>,
    failures_left: Mutex<HashMap<String, usize>>,
    delays: HashMap<String, Duration>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        operation: &str,
        parameters: Parameters,
    ) -> Result<serde_json::Value, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), parameters.clone()));

        if let Some(delay) = self.delays.get(operation) {
            tokio::time::sleep(*delay).await;
        }

        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(operation) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ProviderError::ExecutionFailed("upstream unavailable".to_string()));
                }
            }
        }

        match operation {
            "load_data" => Ok(json!({"data": [3, 1, 2], "source": parameters.get("source")})),
            "process_data" => Ok(json!({"processed_data": [1, 2, 3]})),
            "analyze_processed_data" => Ok(json!({"summary": {"count": 3}})),
            "fetch_dataset" => Ok(json!({"dataset": parameters.get("dataset_id"), "output": [4, 5]})),
            "get_report_data" => Ok(json!({"report": parameters.get("report_type")})),
            "summarize" => Ok(json!({"input": parameters.get("data_input")})),
            other => Err(ProviderError::UnknownOperation(other.to_string())),
        }
    }
}

struct ScriptedFactory {
    name: String,
    operations: Vec<String>,
    calls: Arc<Mutex<Vec<(String, Parameters)>>>,
    failures: HashMap<String, usize>,
    delays: HashMap<String, Duration>,
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl ProviderFactory for ScriptedFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn connect(&self) -> Result<ProviderHandle, ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedProvider {
            name: self.name.clone(),
            calls: Arc::clone(&self.calls),
            failures_left: Mutex::new(self.failures.clone()),
            delays: self.delays.clone(),
        }))
    }
}

#[derive(Default)]
struct Fixture {
    failures: HashMap<String, usize>,
    delays: HashMap<String, Duration>,
    config: Option<RuntimeConfig>,
}

struct Harness {
    orchestrator: Orchestrator,
    data_calls: Arc<Mutex<Vec<(String, Parameters)>>>,
    connects: Arc<AtomicUsize>,
}

impl Harness {
    fn data_calls(&self) -> Vec<(String, Parameters)> {
        self.data_calls.lock().unwrap().clone()
    }
}

impl Fixture {
    fn fail(mut self, operation: &str, times: usize) -> Self {
        self.failures.insert(operation.to_string(), times);
        self
    }

    fn delay(mut self, operation: &str, millis: u64) -> Self {
        self.delays
            .insert(operation.to_string(), Duration::from_millis(millis));
        self
    }

    fn build(self) -> Harness {
        let data_calls = Arc::new(Mutex::new(Vec::new()));
        let connects = Arc::new(AtomicUsize::new(0));
        let mut registry = ProviderRegistry::new();

        registry.register(Arc::new(ScriptedFactory {
            name: "data".to_string(),
            operations: ["load_data", "process_data", "fetch_dataset", "get_report_data"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            calls: Arc::clone(&data_calls),
            failures: self.failures.clone(),
            delays: self.delays.clone(),
            connects: Arc::clone(&connects),
        }));
        registry.register(Arc::new(ScriptedFactory {
            name: "analysis".to_string(),
            operations: vec!["analyze_processed_data".to_string(), "summarize".to_string()],
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: self.failures,
            delays: self.delays,
            connects: Arc::clone(&connects),
        }));

        Harness {
            orchestrator: Orchestrator::new(Arc::new(registry), self.config.unwrap_or_default()),
            data_calls,
            connects,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_data_processing_chain_completes() {
    init_tracing();
    let h = Fixture::default().build();
    let mut notices = h.orchestrator.subscribe();

    let id = h
        .orchestrator
        .start_workflow("data_processing", json!({"source": "X"}))
        .await
        .unwrap();

    let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);
    assert_eq!(
        snapshot.steps_completed,
        vec![
            "data.load_data",
            "data.process_data",
            "analysis.analyze_processed_data"
        ]
    );
    assert_eq!(snapshot.pending_count, 0);
    assert!(snapshot.current_step.is_none());
    assert!(snapshot.last_error.is_none());

    let results = h.orchestrator.workflow_results(id).await.unwrap();
    assert!(results.keys().all(|k| snapshot.steps_completed.contains(k)));
    assert_eq!(results["data.load_data"]["source"], json!("X"));
    assert_eq!(results["analysis.analyze_processed_data"], json!({"summary": {"count": 3}}));

    // Each provider connected exactly once
    assert_eq!(h.connects.load(Ordering::SeqCst), 2);

    let mut running_steps = Vec::new();
    while let Ok(change) = notices.try_recv() {
        if change.workflow_id == id && change.status == WorkflowStatus::Running {
            running_steps.push(change.step.unwrap());
        }
    }
    assert_eq!(running_steps, snapshot.steps_completed);
}

#[tokio::test]
async fn test_identical_submissions_get_unique_ids() {
    let h = Fixture::default().build();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            h.orchestrator
                .start_workflow("report_generation", json!({"report_type": "weekly"}))
                .await
                .unwrap(),
        );
    }
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);
    assert_eq!(h.orchestrator.workflow_count().await, 5);

    for id in ids {
        let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Completed);
        assert_eq!(snapshot.steps_completed, vec!["data.get_report_data"]);
    }
}

#[tokio::test]
async fn test_unknown_workflow_type_creates_nothing() {
    let h = Fixture::default().build();
    let err = h
        .orchestrator
        .start_workflow("bogus", json!({"source": "X"}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownWorkflowType(t) if t == "bogus"));
    assert_eq!(h.orchestrator.workflow_count().await, 0);
}

#[tokio::test]
async fn test_missing_required_input_is_rejected() {
    let h = Fixture::default().build();
    let err = h
        .orchestrator
        .start_workflow("analysis", json!({"source": "X"}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(msg) if msg.contains("dataset_id")));

    let err = h
        .orchestrator
        .start_workflow("analysis", json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    assert_eq!(h.orchestrator.workflow_count().await, 0);
}

#[tokio::test]
async fn test_status_of_unknown_workflow_is_not_found() {
    let h = Fixture::default().build();
    let err = h
        .orchestrator
        .workflow_status(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_failed_step_is_retried_with_retry_parameters() {
    init_tracing();
    let h = Fixture::default().fail("load_data", 1).build();
    let mut notices = h.orchestrator.subscribe();

    let id = h
        .orchestrator
        .start_workflow(
            "data_processing",
            json!({
                "source": "primary",
                "retry_on_error": true,
                "retry_parameters": {"source": "replica"}
            }),
        )
        .await
        .unwrap();

    let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);
    assert_eq!(snapshot.steps_completed.len(), 3);

    let statuses: Vec<WorkflowStatus> = std::iter::from_fn(|| notices.try_recv().ok())
        .filter(|c| c.workflow_id == id)
        .map(|c| c.status)
        .collect();
    assert_eq!(
        &statuses[..4],
        &[
            WorkflowStatus::Running,
            WorkflowStatus::Error,
            WorkflowStatus::Retrying,
            WorkflowStatus::Running
        ]
    );

    let loads: Vec<Parameters> = h
        .data_calls()
        .into_iter()
        .filter(|(op, _)| op == "load_data")
        .map(|(_, params)| params)
        .collect();
    assert_eq!(loads.len(), 2);
    assert_eq!(loads[0]["source"], json!("primary"));
    assert_eq!(loads[1]["source"], json!("replica"));

    // The completed result came from the retried call
    let results = h.orchestrator.workflow_results(id).await.unwrap();
    assert_eq!(results["data.load_data"]["source"], json!("replica"));
}

#[tokio::test]
async fn test_failure_without_retry_halts_and_stays_inspectable() {
    let h = Fixture::default().fail("summarize", 1).build();
    let oracle = StaticPlanOracle::new(
        json!({"steps": [
            {"server": "data", "tool": "fetch_dataset", "parameters": {"dataset_id": "d1"}},
            {"server": "analysis", "tool": "summarize", "parameters": {"data_input": "$prior.output"}},
            {"server": "data", "tool": "get_report_data", "parameters": {"report_type": "final"}}
        ]})
        .to_string(),
    );

    let id = h
        .orchestrator
        .start_planned_workflow("summarize dataset d1", json!({}), &oracle)
        .await
        .unwrap();

    let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Error);
    assert_eq!(snapshot.steps_completed, vec!["data.fetch_dataset"]);
    assert_eq!(snapshot.pending_count, 1);
    assert!(snapshot.current_step.is_none());
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap()
        .contains("analysis.summarize failed"));

    let record = h.orchestrator.workflow_record(id).await.unwrap();
    let failed = record.failed_step.unwrap();
    assert_eq!(failed.label(), "analysis.summarize");
    assert_eq!(failed.parameters["data_input"], json!([4, 5]));
    assert_eq!(record.pending_steps[0].label(), "data.get_report_data");

    // Still there later on
    tokio::time::sleep(Duration::from_millis(50)).await;
    let again = h.orchestrator.workflow_status(id).await.unwrap();
    assert_eq!(again.status, WorkflowStatus::Error);
}

#[tokio::test]
async fn test_planned_workflow_propagates_prior_output() {
    let h = Fixture::default().build();
    let oracle = StaticPlanOracle::new(
        "```json\n{\"steps\": [\
         {\"server\": \"data\", \"tool\": \"fetch_dataset\", \"parameters\": {\"dataset_id\": \"d7\"}},\
         {\"server\": \"analysis\", \"tool\": \"summarize\", \"parameters\": {\"data_input\": \"$prior.output\"}}\
         ]}\n```",
    );

    let id = h
        .orchestrator
        .start_planned_workflow("analyze d7", json!({"region": "north"}), &oracle)
        .await
        .unwrap();

    let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);
    assert_eq!(snapshot.workflow_type.as_str(), "adaptive");

    let results = h.orchestrator.workflow_results(id).await.unwrap();
    assert_eq!(results["analysis.summarize"], json!({"input": [4, 5]}));

    let record = h.orchestrator.workflow_record(id).await.unwrap();
    assert_eq!(record.description.as_deref(), Some("analyze d7"));
}

#[tokio::test]
async fn test_invalid_plan_runs_nothing() {
    let h = Fixture::default().build();
    let oracle = StaticPlanOracle::new(
        json!({"steps": [
            {"server": "data", "tool": "fetch_dataset", "parameters": {"dataset_id": "d1"}},
            {"server": "billing", "tool": "charge", "parameters": {}}
        ]})
        .to_string(),
    );

    let err = h
        .orchestrator
        .start_planned_workflow("charge the customer", json!({}), &oracle)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::PlanValidation(msg) if msg.contains("billing")));

    let unknown_op = StaticPlanOracle::new(
        json!({"steps": [{"server": "data", "tool": "drop_tables"}]}).to_string(),
    );
    let err = h
        .orchestrator
        .start_planned_workflow("clean up", json!({}), &unknown_op)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::PlanValidation(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.orchestrator.workflow_count().await, 0);
    assert!(h.data_calls().is_empty());
    assert_eq!(h.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_step_does_not_block_other_workflows() {
    let h = Fixture::default().delay("fetch_dataset", 400).build();

    let slow = h
        .orchestrator
        .start_workflow("analysis", json!({"dataset_id": "big"}))
        .await
        .unwrap();
    let fast = h
        .orchestrator
        .start_workflow("report_generation", json!({"report_type": "daily"}))
        .await
        .unwrap();

    let fast_snapshot = h
        .orchestrator
        .wait_for(fast, Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(fast_snapshot.status, WorkflowStatus::Completed);

    let slow_snapshot = h.orchestrator.workflow_status(slow).await.unwrap();
    assert_eq!(slow_snapshot.status, WorkflowStatus::Running);
    assert_eq!(slow_snapshot.current_step.as_deref(), Some("data.fetch_dataset"));

    let slow_snapshot = h.orchestrator.wait_for(slow, WAIT).await.unwrap();
    assert_eq!(slow_snapshot.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_caller_timeout_fails_the_step() {
    let h = Fixture::default().delay("get_report_data", 2_000).build();

    let id = h
        .orchestrator
        .start_workflow(
            "report_generation",
            json!({"report_type": "yearly", "invocation_timeout_ms": 50}),
        )
        .await
        .unwrap();

    let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Error);
    assert!(snapshot.last_error.unwrap().contains("Timeout after 50ms"));
}

#[tokio::test]
async fn test_retries_stop_at_configured_bound() {
    let h = Fixture {
        config: Some(RuntimeConfig {
            max_step_retries: Some(1),
            ..RuntimeConfig::default()
        }),
        ..Fixture::default()
    }
    .fail("get_report_data", 5)
    .build();

    let id = h
        .orchestrator
        .start_workflow(
            "report_generation",
            json!({"report_type": "monthly", "retry_on_error": true}),
        )
        .await
        .unwrap();

    let snapshot = h.orchestrator.wait_for(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Error);
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(h.data_calls().len(), 2);
}

#[tokio::test]
async fn test_shutdown_stops_processing() {
    let h = Fixture::default().build();
    h.orchestrator.start().await;
    h.orchestrator.shutdown().await;

    let err = h
        .orchestrator
        .start_workflow("report_generation", json!({"report_type": "daily"}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ShutDown));
    assert_eq!(h.orchestrator.workflow_count().await, 0);
}

#[tokio::test]
async fn test_shutdown_before_first_submit_rejects_work() {
    let h = Fixture::default().build();
    h.orchestrator.shutdown().await;

    let err = h
        .orchestrator
        .start_workflow("report_generation", json!({"report_type": "daily"}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ShutDown));
    assert!(h.orchestrator.list_workflows().await.is_empty());
}
