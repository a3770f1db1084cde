//! Triggers - pipeline が登録する typed trigger と handler
//!
//! | trigger | batched | 役割 |
//! |---|---|---|
//! | `process-outbox` | no | 追加宛先への配送と follower fan-out の判定 |
//! | `send-to-followers` | yes | follower inbox を N 件ずつ配送 |
//! | `retry-activity` | yes | retry batch の再配送 |
//! | `purge-outbox` | yes | 保持期間を過ぎた published item の削除 |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::dispatcher::Dispatcher;
use crate::domain::{OutboxItemId, PipelineError, RetryKey};
use crate::ports::OutboxStore;
use crate::typed::{StepHandler, Trigger};

/// Names of the triggers every pipeline registers.
pub const BUILTIN_TRIGGERS: [&str; 4] = [
    ProcessOutbox::NAME,
    SendToFollowers::NAME,
    RetryActivity::NAME,
    PurgeOutbox::NAME,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutbox {
    pub item_id: OutboxItemId,
}

impl Trigger for ProcessOutbox {
    const NAME: &'static str = "process-outbox";
    const BATCHED: bool = false;

    fn item_id(&self) -> Option<OutboxItemId> {
        Some(self.item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendToFollowers {
    pub item_id: OutboxItemId,
    pub batch_size: usize,
    pub offset: usize,
}

impl Trigger for SendToFollowers {
    const NAME: &'static str = "send-to-followers";

    fn item_id(&self) -> Option<OutboxItemId> {
        Some(self.item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryActivity {
    pub retry_key: RetryKey,
    pub item_id: OutboxItemId,
    pub attempt: u32,
}

impl Trigger for RetryActivity {
    const NAME: &'static str = "retry-activity";

    fn item_id(&self) -> Option<OutboxItemId> {
        Some(self.item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeOutbox {
    pub cutoff: DateTime<Utc>,
    pub batch_size: usize,
}

impl Trigger for PurgeOutbox {
    const NAME: &'static str = "purge-outbox";
}

pub struct ProcessOutboxHandler {
    dispatcher: Arc<Dispatcher>,
}

impl ProcessOutboxHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepHandler<ProcessOutbox> for ProcessOutboxHandler {
    async fn run(&self, args: ProcessOutbox) -> Result<Option<ProcessOutbox>, PipelineError> {
        self.dispatcher.process_outbox(args.item_id).await?;
        Ok(None)
    }
}

pub struct SendToFollowersHandler {
    dispatcher: Arc<Dispatcher>,
}

impl SendToFollowersHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepHandler<SendToFollowers> for SendToFollowersHandler {
    async fn run(&self, args: SendToFollowers) -> Result<Option<SendToFollowers>, PipelineError> {
        self.dispatcher.send_to_followers(args).await
    }
}

pub struct RetryActivityHandler {
    dispatcher: Arc<Dispatcher>,
}

impl RetryActivityHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepHandler<RetryActivity> for RetryActivityHandler {
    async fn run(&self, args: RetryActivity) -> Result<Option<RetryActivity>, PipelineError> {
        self.dispatcher.retry_activity(args).await?;
        Ok(None)
    }
}

pub struct PurgeOutboxHandler {
    outbox: Arc<dyn OutboxStore>,
}

impl PurgeOutboxHandler {
    pub fn new(outbox: Arc<dyn OutboxStore>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl StepHandler<PurgeOutbox> for PurgeOutboxHandler {
    async fn run(&self, args: PurgeOutbox) -> Result<Option<PurgeOutbox>, PipelineError> {
        let batch_size = args.batch_size.max(1);
        let deleted = self
            .outbox
            .delete_published_before(args.cutoff, batch_size)
            .await?;
        info!(deleted, cutoff = %args.cutoff, "purged published outbox items");
        Ok((deleted >= batch_size).then_some(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ActivityType, ActorKind, NewOutboxItem, OutboxItem, OutboxStatus, Visibility,
    };
    use crate::impls::InMemoryOutboxStore;
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn trigger_args_use_stable_json() {
        let ids = UlidGenerator::new(SystemClock);
        let args = SendToFollowers {
            item_id: ids.item_id(),
            batch_size: 100,
            offset: 200,
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["batch_size"], json!(100));
        assert_eq!(value["offset"], json!(200));
        assert_eq!(serde_json::from_value::<SendToFollowers>(value).unwrap(), args);
        assert_eq!(args.item_id(), Some(args.item_id));
    }

    #[test]
    fn only_process_outbox_runs_unlocked() {
        assert!(!ProcessOutbox::BATCHED);
        assert!(SendToFollowers::BATCHED);
        assert!(RetryActivity::BATCHED);
        assert!(PurgeOutbox::BATCHED);
    }

    #[tokio::test]
    async fn purge_continues_until_a_short_step() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let ids = UlidGenerator::new(SystemClock);
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for n in 0..3 {
            let mut item = OutboxItem::new(
                ids.item_id(),
                NewOutboxItem {
                    activity_type: ActivityType::Create,
                    object_reference: format!("https://l/p/{n}"),
                    actor: ActorKind::User,
                    visibility: Visibility::Public,
                    payload: json!({}),
                },
                old,
            );
            item.mark_published(old);
            store.insert(&item).await.unwrap();
        }

        let handler = PurgeOutboxHandler::new(store.clone());
        let args = PurgeOutbox {
            cutoff: old + chrono::Duration::days(1),
            batch_size: 2,
        };
        let next = handler.run(args.clone()).await.unwrap();
        assert_eq!(next, Some(args.clone()));
        assert_eq!(handler.run(args).await.unwrap(), None);
        assert_eq!(store.count(OutboxStatus::Published).await.unwrap(), 0);
    }
}
