//! Outbound domain events.
//!
//! Events are published after the mutation that raised them has committed.
//! Delivery is fire-and-forget: a failing sink is logged and never undoes a
//! stage transition.

use shared_types::{AppError, WorkflowEvent};
use tokio::sync::mpsc;

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &WorkflowEvent) -> Result<(), AppError>;
}

/// Writes every event to the log. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: &WorkflowEvent) -> Result<(), AppError> {
        tracing::info!(
            matter_id = %event.matter_id,
            stage_id = ?event.stage_id,
            kind = %event.kind,
            from = %event.from_status,
            to = %event.to_status,
            "workflow event"
        );
        Ok(())
    }
}

/// Forwards events to an in-process consumer such as a timeline writer.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: &WorkflowEvent) -> Result<(), AppError> {
        self.tx
            .send(event.clone())
            .map_err(|_| AppError::internal("event receiver dropped"))
    }
}

/// Publish a batch of committed events, logging any delivery failure.
pub fn publish_all(sink: &dyn EventSink, events: &[WorkflowEvent]) {
    for event in events {
        if let Err(e) = sink.publish(event) {
            tracing::warn!(
                matter_id = %event.matter_id,
                kind = %event.kind,
                error = %e,
                "failed to deliver workflow event"
            );
        }
    }
}
