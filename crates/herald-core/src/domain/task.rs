use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{OutboxItemId, TaskId};

/// Stable name of a registered trigger (`process-outbox`, `send-to-followers`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerName(String);

impl TriggerName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TriggerName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Trigger + 引数 (+ 対象 item) の“運搬用”データ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    trigger: TriggerName,
    args: serde_json::Value,

    /// Outbox item this task works on; used to cancel it on invalidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item_id: Option<OutboxItemId>,
}

impl TaskEnvelope {
    pub fn new(trigger: TriggerName, args: serde_json::Value) -> Self {
        Self {
            trigger,
            args,
            item_id: None,
        }
    }

    pub fn for_item(mut self, item_id: OutboxItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }

    pub fn trigger(&self) -> &TriggerName {
        &self.trigger
    }

    pub fn args(&self) -> &serde_json::Value {
        &self.args
    }

    pub fn item_id(&self) -> Option<OutboxItemId> {
        self.item_id
    }

    /// Same trigger and item, new arguments.
    pub fn with_args(&self, args: serde_json::Value) -> Self {
        Self {
            trigger: self.trigger.clone(),
            args,
            item_id: self.item_id,
        }
    }
}

/// A task sitting in the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub envelope: TaskEnvelope,
    pub run_at: DateTime<Utc>,

    /// Set while a worker holds the task; it becomes due again afterwards.
    pub leased_until: Option<DateTime<Utc>>,

    /// How many times the task has been handed to a worker.
    pub deliveries: u32,
}

impl ScheduledTask {
    pub fn new(id: TaskId, envelope: TaskEnvelope, run_at: DateTime<Utc>) -> Self {
        Self {
            id,
            envelope,
            run_at,
            leased_until: None,
            deliveries: 0,
        }
    }

    /// When the task is next eligible for leasing.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.leased_until.unwrap_or(self.run_at)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at() <= now
    }
}
