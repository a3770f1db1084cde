//! Events - パイプラインの観測用イベント
//!
//! EventSink に流れる情報のみ。制御フローには使わない。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::activity::{ActivityType, ActorKind, Visibility};
use super::delivery::DeliveryOutcome;
use super::ids::{OutboxItemId, RetryKey};

/// Which kind of send step is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendStage {
    /// Mentions, reply authors and relays, sent from `process-outbox`.
    Additional,
    Followers { offset: usize },
    Retry { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ItemAdded {
        item_id: OutboxItemId,
        activity_type: ActivityType,
        actor: ActorKind,
        visibility: Visibility,
    },

    EnqueueFailed {
        activity_type: Option<ActivityType>,
        reason: String,
    },

    ItemInvalidated {
        item_id: OutboxItemId,
        superseded_by: OutboxItemId,
    },

    BeforeSend {
        item_id: OutboxItemId,
        stage: SendStage,
        inboxes: usize,
    },

    DeliveryAttempted {
        item_id: OutboxItemId,
        inbox: String,
        status: Option<u16>,
        outcome: DeliveryOutcome,
        error: Option<String>,
    },

    RetryScheduled {
        item_id: OutboxItemId,
        key: RetryKey,
        attempt: u32,
        endpoints: usize,
        run_at: DateTime<Utc>,
    },

    RetryDropped {
        item_id: OutboxItemId,
        endpoints: usize,
        reason: String,
    },

    BatchCompleted {
        item_id: OutboxItemId,
        next_offset: usize,
    },

    ProcessingCompleted {
        item_id: OutboxItemId,
    },
}

impl PipelineEvent {
    /// Short machine name, used as the tracing message.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ItemAdded { .. } => "item_added",
            PipelineEvent::EnqueueFailed { .. } => "enqueue_failed",
            PipelineEvent::ItemInvalidated { .. } => "item_invalidated",
            PipelineEvent::BeforeSend { .. } => "before_send",
            PipelineEvent::DeliveryAttempted { .. } => "delivery_attempted",
            PipelineEvent::RetryScheduled { .. } => "retry_scheduled",
            PipelineEvent::RetryDropped { .. } => "retry_dropped",
            PipelineEvent::BatchCompleted { .. } => "batch_completed",
            PipelineEvent::ProcessingCompleted { .. } => "processing_completed",
        }
    }

    pub fn item_id(&self) -> Option<OutboxItemId> {
        match self {
            PipelineEvent::EnqueueFailed { .. } => None,
            PipelineEvent::ItemAdded { item_id, .. }
            | PipelineEvent::ItemInvalidated { item_id, .. }
            | PipelineEvent::BeforeSend { item_id, .. }
            | PipelineEvent::DeliveryAttempted { item_id, .. }
            | PipelineEvent::RetryScheduled { item_id, .. }
            | PipelineEvent::RetryDropped { item_id, .. }
            | PipelineEvent::BatchCompleted { item_id, .. }
            | PipelineEvent::ProcessingCompleted { item_id } => Some(*item_id),
        }
    }
}
