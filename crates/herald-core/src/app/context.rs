//! PipelineContext - ports の束
//!
//! 各サービスはこれを clone して保持する（中身は全て Arc）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{
    PipelineError, PipelineEvent, ScheduledTask, TaskEnvelope, TaskId, TriggerName,
};
use crate::impls::{
    InMemoryLockStore, InMemoryOutboxStore, InMemoryRetryStore, InMemoryTaskScheduler,
    TracingEventSink,
};
use crate::ports::{
    ActorDirectory, Clock, DeliveryTransport, EventSink, IdGenerator, LockStore, OutboxStore,
    RequestSigner, RetryStore, TaskScheduler, UlidGenerator, UnsignedRequests,
};
use crate::typed::Trigger;

#[derive(Clone)]
pub struct PipelineContext {
    pub outbox: Arc<dyn OutboxStore>,
    pub retries: Arc<dyn RetryStore>,
    pub locks: Arc<dyn LockStore>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub transport: Arc<dyn DeliveryTransport>,
    pub signer: Arc<dyn RequestSigner>,
    pub directory: Arc<dyn ActorDirectory>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl PipelineContext {
    /// In-memory stores, unsigned requests and tracing events.
    pub fn in_memory(
        directory: Arc<dyn ActorDirectory>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            outbox: Arc::new(InMemoryOutboxStore::new()),
            retries: Arc::new(InMemoryRetryStore::new()),
            locks: Arc::new(InMemoryLockStore::new()),
            scheduler: Arc::new(InMemoryTaskScheduler::new()),
            transport,
            signer: Arc::new(UnsignedRequests),
            directory,
            events: Arc::new(TracingEventSink),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// SQLite-backed stores sharing one database, tracing events.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(
        db: &crate::impls::sqlite::SqliteDatabase,
        directory: Arc<dyn ActorDirectory>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            outbox: Arc::new(db.outbox()),
            retries: Arc::new(db.retries()),
            locks: Arc::new(db.locks()),
            scheduler: Arc::new(db.scheduler()),
            transport,
            signer: Arc::new(UnsignedRequests),
            directory,
            events: Arc::new(TracingEventSink),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn emit(&self, event: PipelineEvent) {
        self.events.emit(&event);
    }

    /// Schedules a typed trigger `delay` from now.
    pub async fn schedule<T: Trigger>(
        &self,
        args: &T,
        delay: Duration,
    ) -> Result<TaskId, PipelineError> {
        let value = serde_json::to_value(args)
            .map_err(|e| PipelineError::Payload(format!("{}: {e}", T::NAME)))?;
        let mut envelope = TaskEnvelope::new(TriggerName::new(T::NAME), value);
        if let Some(item_id) = args.item_id() {
            envelope = envelope.for_item(item_id);
        }
        self.schedule_envelope(envelope, delay).await
    }

    pub async fn schedule_envelope(
        &self,
        envelope: TaskEnvelope,
        delay: Duration,
    ) -> Result<TaskId, PipelineError> {
        let id = self.ids.task_id();
        let run_at = after(self.now(), delay);
        self.scheduler
            .schedule(ScheduledTask::new(id, envelope, run_at))
            .await?;
        Ok(id)
    }
}

/// `now + delay`, saturating at the latest representable instant.
pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - window`, saturating at the earliest representable instant.
pub fn before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutboxItemId;
    use crate::impls::StaticActorDirectory;
    use crate::ports::FixedClock;
    use crate::typed::handler::tests::Countdown;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl DeliveryTransport for Unreachable {
        async fn deliver(
            &self,
            _request: &crate::ports::DeliveryRequest,
        ) -> Result<crate::domain::DeliveryResponse, crate::domain::TransportError> {
            Err(crate::domain::TransportError::Connect("unreachable".into()))
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Touch {
        item_id: OutboxItemId,
    }

    impl Trigger for Touch {
        const NAME: &'static str = "touch";

        fn item_id(&self) -> Option<OutboxItemId> {
            Some(self.item_id)
        }
    }

    fn context() -> (PipelineContext, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ctx = PipelineContext::in_memory(
            Arc::new(StaticActorDirectory::new("https://local.example")),
            Arc::new(Unreachable),
            Arc::new(FixedClock::new(now)),
        );
        (ctx, now)
    }

    #[tokio::test]
    async fn schedule_records_trigger_args_and_run_at() {
        let (ctx, now) = context();
        ctx.schedule(&Countdown { remaining: 3 }, Duration::from_secs(30))
            .await
            .unwrap();

        let tasks = ctx.scheduler.list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].envelope.trigger().as_str(), "countdown");
        assert_eq!(tasks[0].envelope.args(), &json!({"remaining": 3}));
        assert_eq!(tasks[0].envelope.item_id(), None);
        assert_eq!(tasks[0].run_at, now + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn item_triggers_carry_back_reference() {
        let (ctx, _) = context();
        let item_id = ctx.ids.item_id();
        ctx.schedule(&Touch { item_id }, Duration::ZERO).await.unwrap();

        assert!(ctx.scheduler.has_scheduled_for(item_id).await.unwrap());
    }

    #[test]
    fn after_saturates() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(before(now, Duration::from_secs(60)), now - chrono::Duration::minutes(1));
    }
}
