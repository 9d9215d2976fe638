use crate::invoker::CapabilityInvoker;
use crate::plan::{parse_plan, validate_plan};
use crate::planner::Planner;
use crate::processor::EventProcessor;
use crate::registry::ProviderRegistry;
use crate::store::WorkflowStore;
use relaycore::{
    EventBus, EventReceiver, ExecutionOptions, OrchestratorError, PlanRequest, PlanningOracle,
    StatusChange, StatusSnapshot, WorkflowEvent, WorkflowId, WorkflowRecord, WorkflowType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

enum ProcessorSlot {
    Idle(EventReceiver),
    Running(JoinHandle<()>),
    Stopped,
}

/// Entry point for submitting and inspecting workflows
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    store: Arc<WorkflowStore>,
    planner: Arc<Planner>,
    bus: EventBus,
    config: RuntimeConfig,
    processor: Mutex<ProcessorSlot>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with the standard planning tables
    pub fn new(registry: Arc<ProviderRegistry>, config: RuntimeConfig) -> Self {
        Self::with_planner(registry, Planner::standard(), config)
    }

    /// Create an orchestrator with custom planning tables
    pub fn with_planner(
        registry: Arc<ProviderRegistry>,
        planner: Planner,
        config: RuntimeConfig,
    ) -> Self {
        let (bus, receiver) = EventBus::new(config.notice_buffer_size);
        Self {
            registry,
            store: Arc::new(WorkflowStore::new()),
            planner: Arc::new(planner),
            bus,
            config,
            processor: Mutex::new(ProcessorSlot::Idle(receiver)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get access to the provider registry
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawn the event processor if it is not running yet
    pub async fn start(&self) {
        let mut slot = self.processor.lock().await;
        match std::mem::replace(&mut *slot, ProcessorSlot::Stopped) {
            ProcessorSlot::Idle(receiver) => {
                let processor = EventProcessor {
                    store: Arc::clone(&self.store),
                    registry: Arc::clone(&self.registry),
                    planner: Arc::clone(&self.planner),
                    invoker: CapabilityInvoker::new(
                        self.config.invocation_timeout_ms.map(Duration::from_millis),
                    ),
                    bus: self.bus.clone(),
                    config: self.config.clone(),
                    shutdown: self.shutdown.clone(),
                };
                *slot = ProcessorSlot::Running(tokio::spawn(processor.run(receiver)));
            }
            other => *slot = other,
        }
    }

    /// Stop the event processor; in-flight invocations are abandoned
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let previous = std::mem::replace(&mut *self.processor.lock().await, ProcessorSlot::Stopped);
        if let ProcessorSlot::Running(handle) = previous {
            if let Err(e) = handle.await {
                tracing::error!("Event processor task failed: {}", e);
            }
        }
    }

    /// Submit a workflow of a known type
    pub async fn start_workflow(
        &self,
        workflow_type: &str,
        initial_data: serde_json::Value,
    ) -> Result<WorkflowId, OrchestratorError> {
        let workflow_type: WorkflowType = workflow_type.parse()?;
        let payload = normalize_payload(initial_data)?;
        let options = ExecutionOptions::from_payload(&payload)?;
        let steps = self
            .planner
            .initial_steps(workflow_type, &payload)
            .map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;

        let record = WorkflowRecord::new(workflow_type, payload, options, steps);
        self.submit(record).await
    }

    /// Ask `oracle` for a plan, validate it and run it as an adaptive workflow.
    ///
    /// Nothing is recorded or executed unless the whole plan validates.
    pub async fn start_planned_workflow(
        &self,
        task: &str,
        available_data: serde_json::Value,
        oracle: &dyn PlanningOracle,
    ) -> Result<WorkflowId, OrchestratorError> {
        let payload = normalize_payload(available_data)?;
        let options = ExecutionOptions::from_payload(&payload)?;

        let request = PlanRequest {
            task: task.to_string(),
            available_data: payload.clone(),
            providers: self.registry.summaries(),
        };
        let text = oracle
            .plan(&request)
            .await
            .map_err(|e| OrchestratorError::PlanValidation(format!("planning oracle failed: {}", e)))?;

        let steps = parse_plan(&text)?;
        validate_plan(&steps, &self.registry)?;
        tracing::info!("Plan accepted with {} steps", steps.len());

        let record = WorkflowRecord::new(WorkflowType::Adaptive, payload, options, steps)
            .with_description(task);
        self.submit(record).await
    }

    /// Record the workflow and queue its start; fails once shut down
    async fn submit(&self, record: WorkflowRecord) -> Result<WorkflowId, OrchestratorError> {
        self.start().await;
        // Held until the start event is queued so shutdown cannot slip in between
        let slot = self.processor.lock().await;
        if self.shutdown.is_cancelled() || matches!(*slot, ProcessorSlot::Stopped) {
            tracing::warn!("rejecting workflow submitted after shutdown");
            return Err(OrchestratorError::ShutDown);
        }

        let workflow_id = self.store.insert(record).await;
        if !self.bus.publish(WorkflowEvent::Started { workflow_id }) {
            self.store.remove(workflow_id).await;
            tracing::warn!(%workflow_id, "event processor gone, workflow dropped");
            return Err(OrchestratorError::ShutDown);
        }
        drop(slot);

        tracing::info!(%workflow_id, "workflow submitted");
        Ok(workflow_id)
    }

    pub async fn workflow_status(&self, id: WorkflowId) -> Result<StatusSnapshot, OrchestratorError> {
        self.store.snapshot(id).await
    }

    pub async fn workflow_results(
        &self,
        id: WorkflowId,
    ) -> Result<HashMap<String, serde_json::Value>, OrchestratorError> {
        self.store.results(id).await
    }

    pub async fn workflow_record(&self, id: WorkflowId) -> Result<WorkflowRecord, OrchestratorError> {
        self.store.record(id).await
    }

    pub async fn list_workflows(&self) -> Vec<StatusSnapshot> {
        self.store.list().await
    }

    pub async fn workflow_count(&self) -> usize {
        self.store.len().await
    }

    /// Subscribe to status notices
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.bus.subscribe()
    }

    /// Wait until the workflow completes or halts in error, or `limit` passes.
    ///
    /// Returns the latest snapshot either way.
    pub async fn wait_for(
        &self,
        id: WorkflowId,
        limit: Duration,
    ) -> Result<StatusSnapshot, OrchestratorError> {
        let mut notices = self.subscribe();
        let wait = async {
            loop {
                if self.store.is_settled(id).await? {
                    break;
                }
                // Any notice (or a lag) means the record may have moved on
                if let Err(broadcast::error::RecvError::Closed) = notices.recv().await {
                    break;
                }
            }
            Ok::<(), OrchestratorError>(())
        };

        if tokio::time::timeout(limit, wait).await.is_err() {
            tracing::warn!(workflow_id = %id, "gave up waiting after {:?}", limit);
        }
        self.store.snapshot(id).await
    }
}

fn normalize_payload(payload: serde_json::Value) -> Result<serde_json::Value, OrchestratorError> {
    match payload {
        serde_json::Value::Null => Ok(serde_json::Value::Object(Default::default())),
        serde_json::Value::Object(_) => Ok(payload),
        _ => Err(OrchestratorError::InvalidInput(
            "initial data must be a JSON object".to_string(),
        )),
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default limit for one provider call; `None` waits forever
    pub invocation_timeout_ms: Option<u64>,
    /// Consecutive retries of one failing step; `None` is unlimited
    pub max_step_retries: Option<u32>,
    pub notice_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_ms: None,
            max_step_retries: Some(3),
            notice_buffer_size: 1000,
        }
    }
}
