//! EventSink implementations.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::domain::{DeliveryOutcome, PipelineEvent};
use crate::ports::EventSink;

/// Logs every event as a structured tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ItemAdded {
                item_id,
                activity_type,
                actor,
                visibility,
            } => info!(
                item_id = %item_id,
                activity_type = %activity_type,
                actor = %actor,
                visibility = %visibility,
                "outbox item added"
            ),
            PipelineEvent::EnqueueFailed {
                activity_type,
                reason,
            } => warn!(
                activity_type = activity_type.as_ref().map(|t| t.as_str()),
                reason = %reason,
                "enqueue failed"
            ),
            PipelineEvent::ItemInvalidated {
                item_id,
                superseded_by,
            } => info!(item_id = %item_id, superseded_by = %superseded_by, "outbox item invalidated"),
            PipelineEvent::BeforeSend {
                item_id,
                stage,
                inboxes,
            } => debug!(item_id = %item_id, stage = ?stage, inboxes, "sending to inboxes"),
            PipelineEvent::DeliveryAttempted {
                item_id,
                inbox,
                status,
                outcome,
                error,
            } => match outcome {
                DeliveryOutcome::Delivered => debug!(
                    item_id = %item_id,
                    inbox = %inbox,
                    status,
                    "delivered"
                ),
                _ => warn!(
                    item_id = %item_id,
                    inbox = %inbox,
                    status,
                    outcome = %outcome,
                    error = error.as_deref(),
                    "delivery failed"
                ),
            },
            PipelineEvent::RetryScheduled {
                item_id,
                key,
                attempt,
                endpoints,
                run_at,
            } => info!(
                item_id = %item_id,
                retry_key = %key,
                attempt,
                endpoints,
                run_at = %run_at,
                "retry scheduled"
            ),
            PipelineEvent::RetryDropped {
                item_id,
                endpoints,
                reason,
            } => warn!(item_id = %item_id, endpoints, reason = %reason, "retry dropped"),
            PipelineEvent::BatchCompleted {
                item_id,
                next_offset,
            } => debug!(item_id = %item_id, next_offset, "follower batch complete"),
            PipelineEvent::ProcessingCompleted { item_id } => {
                info!(item_id = %item_id, "delivery complete")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Keeps every event in memory (テスト用).
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events with the given `PipelineEvent::name`.
    pub fn named(&self, name: &str) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name() == name)
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutboxItemId;
    use ulid::Ulid;

    #[test]
    fn recording_sink_filters_by_name() {
        let sink = RecordingEventSink::new();
        let item_id = OutboxItemId::from_ulid(Ulid::new());
        sink.emit(&PipelineEvent::ProcessingCompleted { item_id });
        sink.emit(&PipelineEvent::BatchCompleted {
            item_id,
            next_offset: 100,
        });
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.named("batch_completed").len(), 1);

        sink.clear();
        assert!(sink.events().is_empty());

        // the other sinks accept anything
        TracingEventSink.emit(&PipelineEvent::ProcessingCompleted { item_id });
        NoopEventSink.emit(&PipelineEvent::ProcessingCompleted { item_id });
    }
}
