// crates/relaycore/src/events/mod.rs

mod base;

pub use base::{CompletionSender, EventBus, EventReceiver, StatusChange, WorkflowEvent};
