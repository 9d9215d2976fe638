//! Workflow state machine.
//!
//! `apply` folds one event into a record and returns the effects the event
//! processor must carry out afterwards. It never awaits, so the whole
//! transition happens under the store's write lock and readers only ever
//! see fully applied events.

use crate::planner::Planner;
use crate::runtime::RuntimeConfig;
use chrono::Utc;
use relaycore::{Step, WorkflowEvent, WorkflowRecord, WorkflowStatus};
use std::time::Duration;

/// Work the processor performs after a transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Invoke the step on its own task
    Dispatch {
        step: Step,
        timeout: Option<Duration>,
    },
    Publish(WorkflowEvent),
    Notify {
        status: WorkflowStatus,
        step: Option<String>,
    },
}

pub fn apply(
    record: &mut WorkflowRecord,
    event: WorkflowEvent,
    planner: &Planner,
    config: &RuntimeConfig,
) -> Vec<Effect> {
    let mut effects = Vec::new();

    if record.completed_at.is_some() {
        tracing::warn!(
            workflow_id = %record.id,
            event = event.kind(),
            "ignoring event for finished workflow"
        );
        return effects;
    }

    match event {
        WorkflowEvent::Started { .. } => {
            if record.status != WorkflowStatus::Initializing {
                tracing::warn!(workflow_id = %record.id, status = %record.status, "duplicate start");
                return effects;
            }
            tracing::info!(workflow_id = %record.id, workflow_type = %record.workflow_type, "workflow started");
            advance(record, &mut effects);
        }
        WorkflowEvent::StepCompleted { result, .. } => {
            let Some(step) = record.current_step.take() else {
                tracing::warn!(workflow_id = %record.id, "step result with no step outstanding");
                return effects;
            };
            let label = step.label();
            tracing::info!(workflow_id = %record.id, step = %label, "step completed");

            if step.provider == "data" {
                if let Some(output) = result.get("output") {
                    for pending in record.pending_steps.iter_mut() {
                        *pending = pending.with_data_input(output);
                    }
                }
            }
            record.completed_step_labels.push(label.clone());
            record.results.insert(label.clone(), result);
            let next = planner.continuation(
                record.workflow_type,
                &label,
                &record.input_payload,
                &record.results,
            );
            record.failed_step = None;
            record.retry_count = 0;

            match next {
                Ok(steps) => {
                    record.pending_steps.extend(steps);
                    advance(record, &mut effects);
                }
                Err(e) => {
                    tracing::error!(workflow_id = %record.id, step = %label, "cannot plan next step: {}", e);
                    record.status = WorkflowStatus::Error;
                    record.last_error = Some(format!("planning after {} failed: {}", label, e));
                    effects.push(Effect::Notify {
                        status: WorkflowStatus::Error,
                        step: Some(label),
                    });
                }
            }
        }
        WorkflowEvent::Error { error, .. } => {
            let Some(step) = record.current_step.take() else {
                tracing::warn!(workflow_id = %record.id, "error with no step outstanding: {}", error);
                return effects;
            };
            let label = step.label();
            tracing::warn!(workflow_id = %record.id, step = %label, "step failed: {}", error);

            record.status = WorkflowStatus::Error;
            record.last_error = Some(error.to_string());
            record.failed_step = Some(step.clone());
            effects.push(Effect::Notify {
                status: WorkflowStatus::Error,
                step: Some(label.clone()),
            });

            if !record.options.retry_on_error {
                tracing::info!(workflow_id = %record.id, "halting in error, retry not requested");
                return effects;
            }

            if let Some(expected) = record.options.retry_step.as_deref() {
                if expected != label {
                    record.last_error = Some(format!(
                        "retry configured for {} but {} failed: {}",
                        expected, label, error
                    ));
                    tracing::error!(workflow_id = %record.id, "retry_step mismatch, halting");
                    return effects;
                }
            }

            if let Some(max) = config.max_step_retries {
                if record.retry_count >= max {
                    record.last_error = Some(format!("{} (gave up after {} retries)", error, max));
                    tracing::error!(workflow_id = %record.id, step = %label, "retries exhausted");
                    return effects;
                }
            }

            record.retry_count += 1;
            record.status = WorkflowStatus::Retrying;
            tracing::info!(workflow_id = %record.id, step = %label, attempt = record.retry_count, "retrying step");
            effects.push(Effect::Notify {
                status: WorkflowStatus::Retrying,
                step: Some(label),
            });
            record
                .pending_steps
                .push_front(step.with_overrides(&record.options.retry_parameters));
            advance(record, &mut effects);
        }
        WorkflowEvent::WorkflowCompleted { .. } => {
            if record.status != WorkflowStatus::Completed {
                tracing::warn!(workflow_id = %record.id, status = %record.status, "completion event for unfinished workflow");
                return effects;
            }
            record.completed_at = Some(Utc::now());
            tracing::info!(
                workflow_id = %record.id,
                steps = record.completed_step_labels.len(),
                duration_ms = record.elapsed_ms(),
                "workflow completed"
            );
        }
    }

    effects
}

/// Start the next pending step, or finish the workflow when none remain
fn advance(record: &mut WorkflowRecord, effects: &mut Vec<Effect>) {
    match record.pending_steps.pop_front() {
        None => {
            record.status = WorkflowStatus::Completed;
            effects.push(Effect::Notify {
                status: WorkflowStatus::Completed,
                step: None,
            });
            effects.push(Effect::Publish(WorkflowEvent::WorkflowCompleted {
                workflow_id: record.id,
            }));
        }
        Some(next) => {
            let step = next.with_prior_output(record.prior_result());
            let label = step.label();
            tracing::debug!(workflow_id = %record.id, step = %label, "dispatching step");
            record.current_step = Some(step.clone());
            record.status = WorkflowStatus::Running;
            effects.push(Effect::Notify {
                status: WorkflowStatus::Running,
                step: Some(label),
            });
            effects.push(Effect::Dispatch {
                step,
                timeout: record.options.invocation_timeout_ms.map(Duration::from_millis),
            });
        }
    }
}
