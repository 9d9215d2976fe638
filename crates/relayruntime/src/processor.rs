use crate::invoker::CapabilityInvoker;
use crate::machine::{self, Effect};
use crate::planner::Planner;
use crate::registry::ProviderRegistry;
use crate::runtime::RuntimeConfig;
use crate::store::WorkflowStore;
use relaycore::{EventBus, EventReceiver, InvocationFailure, Step, WorkflowEvent, WorkflowId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The single consumer of the event bus.
///
/// Record mutation happens here one event at a time; provider calls are
/// spawned so a slow step never holds up other workflows' events.
pub(crate) struct EventProcessor {
    pub(crate) store: Arc<WorkflowStore>,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) planner: Arc<Planner>,
    pub(crate) invoker: CapabilityInvoker,
    pub(crate) bus: EventBus,
    pub(crate) config: RuntimeConfig,
    pub(crate) shutdown: CancellationToken,
}

impl EventProcessor {
    pub(crate) async fn run(self, mut receiver: EventReceiver) {
        tracing::info!("Event processor started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        tracing::info!("Event processor stopped");
    }

    async fn handle(&self, event: WorkflowEvent) {
        let workflow_id = event.workflow_id();
        let kind = event.kind();
        tracing::debug!(%workflow_id, kind, "processing event");

        let effects = self
            .store
            .update(workflow_id, |record| {
                machine::apply(record, event, &self.planner, &self.config)
            })
            .await;

        let Some(effects) = effects else {
            tracing::error!(%workflow_id, kind, "event for unknown workflow");
            return;
        };

        for effect in effects {
            match effect {
                Effect::Dispatch { step, timeout } => self.dispatch(workflow_id, step, timeout),
                Effect::Publish(event) => {
                    self.bus.publish(event);
                }
                Effect::Notify { status, step } => self.bus.notify(workflow_id, status, step),
            }
        }
    }

    fn dispatch(&self, workflow_id: WorkflowId, step: Step, timeout: Option<Duration>) {
        let registry = Arc::clone(&self.registry);
        let invoker = self.invoker.clone();
        let completion = self.bus.completion_sender(workflow_id);

        tokio::spawn(async move {
            let outcome = match registry.resolve(&step.provider).await {
                Ok(handle) => invoker.invoke(&handle, &step, timeout).await,
                Err(e) => Err(InvocationFailure::new(
                    step.provider.clone(),
                    step.operation.clone(),
                    e.to_string(),
                )),
            };

            match outcome {
                Ok(result) => completion.completed(result),
                Err(failure) => completion.failed(failure),
            }
        });
    }
}
