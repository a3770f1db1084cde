//! OutboxService - enqueue / invalidation / undo / reschedule
//!
//! 新しい item を保存した直後に、同じ object を指す古い pending item を
//! published に落とし、その予定済み step と retry batch を取り消す。

use std::time::Duration;

use tracing::{debug, info};

use crate::app::context::{PipelineContext, before};
use crate::app::triggers::{ProcessOutbox, PurgeOutbox};
use crate::domain::{
    Activity, ActivityType, ActorKind, NewOutboxItem, OutboxItem, OutboxItemId, PipelineError,
    PipelineEvent, SupersededQuery, TaskId, Visibility,
};

#[derive(Clone)]
pub struct OutboxService {
    ctx: PipelineContext,
}

impl OutboxService {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Persists `activity` as a pending item and schedules its processing.
    ///
    /// Fails with [`PipelineError::Resolution`] when the activity has no type,
    /// no resolvable object or no local `actor`; nothing is persisted in that
    /// case. A Delete naming its actor is accepted without a local actor.
    pub async fn enqueue(
        &self,
        activity: &Activity,
        actor: ActorKind,
        visibility: Visibility,
    ) -> Result<OutboxItemId, PipelineError> {
        let Some(activity_type) = activity.kind() else {
            return Err(self.enqueue_failed(None, "activity has no type"));
        };
        let Some(object_reference) = activity.object_reference() else {
            return Err(self.enqueue_failed(
                Some(activity_type),
                "cannot resolve the activity's object",
            ));
        };
        let actor_gone = self.ctx.directory.resolve_local(actor).await?.is_none();
        if actor_gone && !(activity_type == ActivityType::Delete && activity.actor().is_some()) {
            return Err(self.enqueue_failed(Some(activity_type), "cannot resolve actor"));
        }

        let now = self.ctx.now();
        let item = OutboxItem::new(
            self.ctx.ids.item_id(),
            NewOutboxItem {
                activity_type,
                object_reference,
                actor,
                visibility,
                payload: activity.as_value().clone(),
            },
            now,
        );
        self.ctx.outbox.insert(&item).await?;

        self.invalidate_superseded(&item).await?;

        self.ctx.emit(PipelineEvent::ItemAdded {
            item_id: item.id,
            activity_type: item.activity_type.clone(),
            actor,
            visibility,
        });
        self.ctx
            .schedule(&ProcessOutbox { item_id: item.id }, Duration::ZERO)
            .await?;

        Ok(item.id)
    }

    fn enqueue_failed(&self, activity_type: Option<ActivityType>, reason: &str) -> PipelineError {
        self.ctx.emit(PipelineEvent::EnqueueFailed {
            activity_type,
            reason: reason.to_string(),
        });
        PipelineError::Resolution(reason.to_string())
    }

    /// Force-publishes pending items that `item` supersedes and cancels their
    /// scheduled steps and retry batches. Returns how many were invalidated.
    pub async fn invalidate_superseded(&self, item: &OutboxItem) -> Result<usize, PipelineError> {
        let query = SupersededQuery::for_new_item(&item.object_reference, &item.activity_type);
        let mut invalidated = 0;

        for mut old in self.ctx.outbox.find_superseded(&query).await? {
            if old.id == item.id {
                continue;
            }
            let cancelled = self.ctx.scheduler.cancel_for_item(old.id).await?;
            let dropped = self.ctx.retries.delete_for_item(old.id).await?;

            old.mark_invalidated(self.ctx.now());
            self.ctx.outbox.save(&old).await?;

            debug!(
                item_id = %old.id,
                cancelled_tasks = cancelled,
                dropped_retries = dropped,
                "cancelled superseded work"
            );
            self.ctx.emit(PipelineEvent::ItemInvalidated {
                item_id: old.id,
                superseded_by: item.id,
            });
            invalidated += 1;
        }

        Ok(invalidated)
    }

    pub async fn item(&self, id: OutboxItemId) -> Result<OutboxItem, PipelineError> {
        self.ctx
            .outbox
            .get(id)
            .await?
            .ok_or(PipelineError::ItemNotFound(id))
    }

    pub async fn get_activity(&self, id: OutboxItemId) -> Result<Activity, PipelineError> {
        Ok(reconstruct_activity(&self.item(id).await?))
    }

    /// Enqueues the inverse of item `id` with the same actor and visibility.
    pub async fn undo(&self, id: OutboxItemId) -> Result<OutboxItemId, PipelineError> {
        let item = self.item(id).await?;
        let activity = reconstruct_activity(&item);

        let inverse = match item.activity_type.inverse() {
            ActivityType::Undo => Activity::wrap(ActivityType::Undo, activity.into_value()),
            kind => activity.reissue(kind),
        };
        info!(item_id = %id, inverse = %item.activity_type.inverse(), "undoing outbox item");

        self.enqueue(&inverse, item.actor, item.visibility).await
    }

    /// Puts item `id` back to pending from the start and schedules it.
    pub async fn reschedule(&self, id: OutboxItemId) -> Result<TaskId, PipelineError> {
        let mut item = self.item(id).await?;

        self.ctx.scheduler.cancel_for_item(id).await?;
        item.reset_for_redelivery(self.ctx.now());
        self.ctx.outbox.save(&item).await?;

        let task_id = self
            .ctx
            .schedule(&ProcessOutbox { item_id: id }, Duration::ZERO)
            .await?;
        info!(item_id = %id, task_id = %task_id, "outbox item rescheduled");
        Ok(task_id)
    }

    /// Schedules the purge job for published items older than `retention`.
    pub async fn schedule_purge(
        &self,
        retention: Duration,
        batch_size: usize,
    ) -> Result<TaskId, PipelineError> {
        let cutoff = before(self.ctx.now(), retention);
        self.ctx
            .schedule(&PurgeOutbox { cutoff, batch_size }, Duration::ZERO)
            .await
    }
}

/// The activity stored for `item`.
///
/// The payload can be a pre-fill whose type was decided later (an object
/// that is being announced or undone); when the payload's type disagrees
/// with the recorded one, a shell of the recorded type wraps it.
pub fn reconstruct_activity(item: &OutboxItem) -> Activity {
    if let Some(activity) = Activity::from_value(item.payload.clone())
        && activity.kind().as_ref() == Some(&item.activity_type)
    {
        return activity;
    }
    Activity::wrap(item.activity_type.clone(), item.payload.clone())
}
