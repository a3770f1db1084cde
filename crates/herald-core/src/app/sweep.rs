//! StuckItemSweep - 取り残された pending item の再起動
//!
//! pending のまま `stuck_after` 以上更新がなく、予定済み task もなく、
//! follower 配送のロックも握られていない item に process-outbox を予約し直す。

use std::time::Duration;

use tracing::info;

use crate::app::context::{PipelineContext, before};
use crate::app::lock::LockManager;
use crate::app::triggers::{ProcessOutbox, SendToFollowers};
use crate::domain::PipelineError;
use crate::typed::Trigger;

const SWEEP_LIMIT: usize = 500;

#[derive(Clone)]
pub struct StuckItemSweep {
    ctx: PipelineContext,
    locks: LockManager,
    stuck_after: Duration,
}

impl StuckItemSweep {
    pub fn new(ctx: PipelineContext, locks: LockManager, stuck_after: Duration) -> Self {
        Self {
            ctx,
            locks,
            stuck_after,
        }
    }

    /// Returns how many items were re-triggered.
    pub async fn run_once(&self) -> Result<usize, PipelineError> {
        if self
            .locks
            .is_held(&LockManager::key_for(SendToFollowers::NAME))
            .await?
        {
            return Ok(0);
        }

        let cutoff = before(self.ctx.now(), self.stuck_after);
        let mut retriggered = 0;
        for item in self.ctx.outbox.list_pending(cutoff, SWEEP_LIMIT).await? {
            if self.ctx.scheduler.has_scheduled_for(item.id).await? {
                continue;
            }
            self.ctx
                .schedule(&ProcessOutbox { item_id: item.id }, Duration::ZERO)
                .await?;
            info!(
                item_id = %item.id,
                offset = item.offset,
                updated_at = %item.updated_at,
                "re-triggering stuck outbox item"
            );
            retriggered += 1;
        }
        Ok(retriggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::domain::{
        ActivityType, ActorKind, DeliveryResponse, NewOutboxItem, OutboxItem, TransportError,
        Visibility,
    };
    use crate::impls::StaticActorDirectory;
    use crate::ports::{Clock, DeliveryRequest, DeliveryTransport, FixedClock};

    struct Accepting;

    #[async_trait]
    impl DeliveryTransport for Accepting {
        async fn deliver(&self, _: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
            Ok(DeliveryResponse::new(202))
        }
    }

    const HOUR: Duration = Duration::from_secs(60 * 60);

    async fn setup() -> (StuckItemSweep, PipelineContext, FixedClock, OutboxItem) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let ctx = PipelineContext::in_memory(
            Arc::new(StaticActorDirectory::new("https://local.example")),
            Arc::new(Accepting),
            Arc::new(clock.clone()),
        );
        let item = OutboxItem::new(
            ctx.ids.item_id(),
            NewOutboxItem {
                activity_type: ActivityType::Create,
                object_reference: "https://local.example/p/1".into(),
                actor: ActorKind::User,
                visibility: Visibility::Public,
                payload: json!({"type": "Create"}),
            },
            clock.now(),
        );
        ctx.outbox.insert(&item).await.unwrap();
        let locks = LockManager::new(ctx.locks.clone(), ctx.clock.clone(), Duration::from_secs(30 * 60));
        (StuckItemSweep::new(ctx.clone(), locks, HOUR), ctx, clock, item)
    }

    #[tokio::test]
    async fn recent_items_are_left_alone() {
        let (sweep, _, clock, _) = setup().await;
        clock.advance(HOUR / 2);
        assert_eq!(sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn idle_item_is_retriggered_once() {
        let (sweep, ctx, clock, item) = setup().await;
        clock.advance(HOUR * 2);

        assert_eq!(sweep.run_once().await.unwrap(), 1);
        assert!(ctx.scheduler.has_scheduled_for(item.id).await.unwrap());
        // already scheduled now
        assert_eq!(sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn held_follower_lock_blocks_the_sweep() {
        let (sweep, ctx, clock, _) = setup().await;
        clock.advance(HOUR * 2);
        ctx.locks
            .try_acquire(
                &LockManager::key_for(SendToFollowers::NAME),
                "other-worker",
                clock.now(),
                Duration::from_secs(1800),
            )
            .await
            .unwrap();

        assert_eq!(sweep.run_once().await.unwrap(), 0);
    }
}
