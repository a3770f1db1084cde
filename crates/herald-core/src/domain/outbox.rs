//! Outbox item record and its status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::{ActivityType, ActorKind, Visibility};
use super::ids::OutboxItemId;

/// Delivery status of an outbox item.
///
/// `Pending -> Published` is the only forward transition; `Published ->
/// Pending` happens only through an explicit reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Published)
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// One activity queued for federation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: OutboxItemId,
    pub activity_type: ActivityType,
    pub object_reference: String,
    pub actor: ActorKind,
    pub visibility: Visibility,
    pub status: OutboxStatus,

    /// Cursor into the follower inbox list; `None` once delivery completed.
    pub offset: Option<usize>,

    /// Serialized activity body, opaque to the pipeline.
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when a newer item superseded this one.
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl OutboxItem {
    pub fn new(id: OutboxItemId, new: NewOutboxItem, now: DateTime<Utc>) -> Self {
        Self {
            id,
            activity_type: new.activity_type,
            object_reference: new.object_reference,
            actor: new.actor,
            visibility: new.visibility,
            status: OutboxStatus::Pending,
            offset: None,
            payload: new.payload,
            created_at: now,
            updated_at: now,
            invalidated_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }

    /// Whether a newly enqueued activity supersedes this item.
    ///
    /// A Delete supersedes any pending activity on the same object; other
    /// types only supersede pending items of the same type.
    pub fn is_superseded_by(&self, object_reference: &str, kind: &ActivityType) -> bool {
        self.is_pending()
            && self.object_reference == object_reference
            && (*kind == ActivityType::Delete || self.activity_type == *kind)
    }

    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Published;
        self.offset = None;
        self.updated_at = now;
    }

    pub fn mark_invalidated(&mut self, now: DateTime<Utc>) {
        self.mark_published(now);
        self.invalidated_at = Some(now);
    }

    pub fn advance_offset(&mut self, offset: usize, now: DateTime<Utc>) {
        self.offset = Some(offset);
        self.updated_at = now;
    }

    /// Back to `Pending` for a full redelivery.
    pub fn reset_for_redelivery(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Pending;
        self.offset = None;
        self.invalidated_at = None;
        self.updated_at = now;
    }
}

/// Input for creating an outbox item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxItem {
    pub activity_type: ActivityType,
    pub object_reference: String,
    pub actor: ActorKind,
    pub visibility: Visibility,
    pub payload: serde_json::Value,
}

/// Filter for the invalidation lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct SupersededQuery {
    pub object_reference: String,
    /// `None` matches every activity type.
    pub activity_type: Option<ActivityType>,
}

impl SupersededQuery {
    pub fn for_new_item(object_reference: &str, kind: &ActivityType) -> Self {
        Self {
            object_reference: object_reference.to_string(),
            activity_type: (*kind != ActivityType::Delete).then(|| kind.clone()),
        }
    }

    pub fn matches(&self, item: &OutboxItem) -> bool {
        item.is_pending()
            && item.object_reference == self.object_reference
            && self
                .activity_type
                .as_ref()
                .is_none_or(|kind| *kind == item.activity_type)
    }
}
