use crate::{InvocationFailure, WorkflowId, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Lifecycle events driving the workflow state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    Started {
        workflow_id: WorkflowId,
    },
    StepCompleted {
        workflow_id: WorkflowId,
        result: serde_json::Value,
    },
    Error {
        workflow_id: WorkflowId,
        error: InvocationFailure,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            WorkflowEvent::Started { workflow_id }
            | WorkflowEvent::StepCompleted { workflow_id, .. }
            | WorkflowEvent::Error { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id } => *workflow_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::Started { .. } => "started",
            WorkflowEvent::StepCompleted { .. } => "step_completed",
            WorkflowEvent::Error { .. } => "error",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
        }
    }
}

/// Notice published after the processor applies a transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    /// Label of the step the transition concerns, if any
    pub step: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Handle given to an in-flight invocation to report its outcome
#[derive(Clone)]
pub struct CompletionSender {
    workflow_id: WorkflowId,
    bus: EventBus,
}

impl CompletionSender {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn completed(&self, result: serde_json::Value) {
        self.bus.publish(WorkflowEvent::StepCompleted {
            workflow_id: self.workflow_id,
            result,
        });
    }

    pub fn failed(&self, error: InvocationFailure) {
        self.bus.publish(WorkflowEvent::Error {
            workflow_id: self.workflow_id,
            error,
        });
    }
}

/// Ordered single-consumer event queue plus a broadcast of status notices
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
    notices: broadcast::Sender<StatusChange>,
}

impl EventBus {
    /// Create the bus and the one receiver the event processor owns
    pub fn new(notice_capacity: usize) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(notice_capacity.max(1));
        (Self { sender, notices }, EventReceiver { receiver })
    }

    /// Enqueue an event; returns false once the processor has gone away
    pub fn publish(&self, event: WorkflowEvent) -> bool {
        let workflow_id = event.workflow_id();
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(%workflow_id, kind, "event processor stopped, dropping event");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.notices.subscribe()
    }

    pub fn notify(&self, workflow_id: WorkflowId, status: WorkflowStatus, step: Option<String>) {
        let _ = self.notices.send(StatusChange {
            workflow_id,
            status,
            step,
            timestamp: Utc::now(),
        });
    }

    pub fn completion_sender(&self, workflow_id: WorkflowId) -> CompletionSender {
        CompletionSender {
            workflow_id,
            bus: self.clone(),
        }
    }
}

/// Consumer end of the event queue
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn events_arrive_in_enqueue_order() {
        let (bus, mut receiver) = EventBus::new(8);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        bus.publish(WorkflowEvent::Started { workflow_id: a });
        bus.publish(WorkflowEvent::Started { workflow_id: b });
        bus.completion_sender(a).completed(serde_json::json!({"ok": true}));

        assert_eq!(receiver.recv().await.unwrap().workflow_id(), a);
        assert_eq!(receiver.recv().await.unwrap().workflow_id(), b);
        let third = receiver.recv().await.unwrap();
        assert_eq!(third.kind(), "step_completed");
        assert_eq!(third.workflow_id(), a);
    }

    #[tokio::test]
    async fn publish_reports_closed_processor() {
        let (bus, receiver) = EventBus::new(8);
        drop(receiver);
        assert!(!bus.publish(WorkflowEvent::Started {
            workflow_id: Uuid::new_v4()
        }));
    }

    #[tokio::test]
    async fn subscribers_receive_notices() {
        let (bus, _receiver) = EventBus::new(8);
        let mut notices = bus.subscribe();
        let id = Uuid::new_v4();

        bus.notify(id, WorkflowStatus::Running, Some("data.load_data".to_string()));

        let change = notices.recv().await.unwrap();
        assert_eq!(change.workflow_id, id);
        assert_eq!(change.status, WorkflowStatus::Running);
        assert_eq!(change.step.as_deref(), Some("data.load_data"));
    }
}
