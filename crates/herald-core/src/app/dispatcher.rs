//! Dispatcher - fan-out 配送
//!
//! # 状態遷移（item ごと、trigger 駆動）
//! ```text
//! process-outbox
//!   ├─ actor 解決不可 (Delete 以外) → published
//!   ├─ 追加宛先へ配送（失敗分は retry batch へ）
//!   └─ fan-out 対象? ── no → published
//!                    └─ yes → send-to-followers(offset)
//! send-to-followers
//!   ├─ N 件取得して配送
//!   ├─ 取得数 < N → published（offset クリア）
//!   └─ 取得数 = N → offset += N、続きを返す
//! ```
//!
//! 配送失敗のうち retryable なものだけを RetryBatch に積み、
//! `RetryPolicy` に従って retry-activity を予約する。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::app::context::{PipelineContext, after};
use crate::app::outbox::reconstruct_activity;
use crate::app::recipients::{RecipientResolver, dedup_inboxes};
use crate::app::triggers::{RetryActivity, SendToFollowers};
use crate::domain::activity::is_public_marker;
use crate::domain::{
    Activity, ActivityType, DeliveryOutcome, Inbox, OutboxItem, OutboxItemId, PipelineError,
    PipelineEvent, RetryBatch, RetryDecision, RetryPolicy, SendStage, StoreError,
};
use crate::ports::{DeliveryRequest, LocalActor};

pub struct Dispatcher {
    ctx: PipelineContext,
    resolver: Arc<dyn RecipientResolver>,
    retry_policy: RetryPolicy,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(
        ctx: PipelineContext,
        resolver: Arc<dyn RecipientResolver>,
        retry_policy: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            ctx,
            resolver,
            retry_policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Entry point of `process-outbox`.
    pub async fn process_outbox(&self, item_id: OutboxItemId) -> Result<(), PipelineError> {
        let Some(item) = self.ctx.outbox.get(item_id).await? else {
            debug!(item_id = %item_id, "outbox item gone, nothing to process");
            return Ok(());
        };
        if !item.is_pending() {
            debug!(item_id = %item_id, "outbox item already published");
            return Ok(());
        }

        let activity = reconstruct_activity(&item);
        let Some(actor) = self.sending_actor(&item, &activity).await? else {
            info!(
                item_id = %item_id,
                actor = %item.actor,
                "actor no longer resolvable, publishing without delivery"
            );
            self.complete(item_id).await?;
            return Ok(());
        };

        let additional = self.resolver.additional_inboxes(&activity, &actor).await?;
        if !additional.is_empty() {
            self.ctx.emit(PipelineEvent::BeforeSend {
                item_id,
                stage: SendStage::Additional,
                inboxes: additional.len(),
            });
            let failed = self.deliver_all(item_id, &actor, &activity, &additional).await?;
            self.schedule_retry(item_id, failed, 0).await?;
        }

        if self.should_fan_out(&item, &activity, &actor).await? {
            let offset = item.offset.unwrap_or(0);
            self.ctx
                .schedule(
                    &SendToFollowers {
                        item_id,
                        batch_size: self.batch_size,
                        offset,
                    },
                    Duration::ZERO,
                )
                .await?;
            debug!(item_id = %item_id, offset, "follower fan-out scheduled");
        } else {
            self.complete(item_id).await?;
        }
        Ok(())
    }

    /// One follower batch. Returns the next step's arguments while there may
    /// be more followers.
    pub async fn send_to_followers(
        &self,
        args: SendToFollowers,
    ) -> Result<Option<SendToFollowers>, PipelineError> {
        let item_id = args.item_id;
        let Some(item) = self.ctx.outbox.get(item_id).await? else {
            return Ok(None);
        };
        if !item.is_pending() {
            debug!(item_id = %item_id, "item no longer pending, skipping follower batch");
            return Ok(None);
        }
        let stored_offset = item.offset.unwrap_or(0);
        if args.offset != stored_offset {
            debug!(
                item_id = %item_id,
                offset = args.offset,
                stored_offset,
                "follower batch already handled, dropping duplicate"
            );
            return Ok(None);
        }

        let activity = reconstruct_activity(&item);
        let Some(actor) = self.sending_actor(&item, &activity).await? else {
            self.complete(item_id).await?;
            return Ok(None);
        };

        let batch_size = args.batch_size.max(1);
        let fetched = if item.activity_type == ActivityType::Delete {
            self.ctx
                .directory
                .remote_inboxes(args.offset, batch_size)
                .await?
        } else {
            self.ctx
                .directory
                .follower_inboxes(&actor, args.offset, batch_size)
                .await?
        };
        let fetched_count = fetched.len();
        let inboxes = dedup_inboxes(fetched);

        self.ctx.emit(PipelineEvent::BeforeSend {
            item_id,
            stage: SendStage::Followers {
                offset: args.offset,
            },
            inboxes: inboxes.len(),
        });
        let failed = self.deliver_all(item_id, &actor, &activity, &inboxes).await?;
        self.schedule_retry(item_id, failed, 0).await?;

        if fetched_count < batch_size {
            self.complete(item_id).await?;
            return Ok(None);
        }

        let next_offset = args.offset + fetched_count;
        let advanced = self
            .ctx
            .outbox
            .advance_offset(item_id, args.offset, next_offset, self.ctx.now())
            .await?;
        if !advanced {
            debug!(item_id = %item_id, "item changed during the batch, stopping fan-out");
            return Ok(None);
        }
        self.ctx.emit(PipelineEvent::BatchCompleted {
            item_id,
            next_offset,
        });
        Ok(Some(SendToFollowers {
            offset: next_offset,
            batch_size,
            ..args
        }))
    }

    /// Entry point of `retry-activity`.
    pub async fn retry_activity(&self, args: RetryActivity) -> Result<(), PipelineError> {
        let now = self.ctx.now();
        let Some(batch) = self.ctx.retries.get(args.retry_key, now).await? else {
            debug!(retry_key = %args.retry_key, "retry batch missing or expired");
            return Ok(());
        };
        if !self.ctx.retries.delete(batch.key).await? {
            debug!(retry_key = %batch.key, "retry batch claimed by another run");
            return Ok(());
        }

        let item = match self.ctx.outbox.get(batch.item_id).await? {
            Some(item) if !item.is_invalidated() => item,
            _ => {
                debug!(item_id = %batch.item_id, "item superseded or gone, dropping retry");
                return Ok(());
            }
        };

        let activity = reconstruct_activity(&item);
        let Some(actor) = self.sending_actor(&item, &activity).await? else {
            info!(item_id = %item.id, "actor no longer resolvable, dropping retry");
            return Ok(());
        };

        let inboxes = dedup_inboxes(batch.endpoints.iter().map(Inbox::new).collect());
        self.ctx.emit(PipelineEvent::BeforeSend {
            item_id: item.id,
            stage: SendStage::Retry {
                attempt: batch.attempt,
            },
            inboxes: inboxes.len(),
        });
        let failed = self.deliver_all(item.id, &actor, &activity, &inboxes).await?;
        self.schedule_retry(item.id, failed, batch.attempt).await
    }

    /// The local identity that sends `item`.
    ///
    /// A Delete still goes out when its actor is gone, signed as the actor
    /// named in the activity.
    async fn sending_actor(
        &self,
        item: &OutboxItem,
        activity: &Activity,
    ) -> Result<Option<LocalActor>, PipelineError> {
        if let Some(actor) = self.ctx.directory.resolve_local(item.actor).await? {
            return Ok(Some(actor));
        }
        if item.activity_type != ActivityType::Delete {
            return Ok(None);
        }
        Ok(activity.actor().map(|id| LocalActor {
            kind: item.actor,
            id,
            followers: None,
        }))
    }

    async fn should_fan_out(
        &self,
        item: &OutboxItem,
        activity: &Activity,
        actor: &LocalActor,
    ) -> Result<bool, PipelineError> {
        if !item.visibility.allows_follower_fan_out() {
            return Ok(false);
        }
        let audience = activity.audience();
        let addressed = audience.iter().any(|uri| is_public_marker(uri))
            || actor
                .followers
                .as_deref()
                .is_some_and(|followers| audience.iter().any(|uri| uri == followers));
        if !addressed {
            return Ok(false);
        }
        let count = if item.activity_type == ActivityType::Delete {
            self.ctx.directory.remote_inbox_count().await?
        } else {
            self.ctx.directory.follower_inbox_count(actor).await?
        };
        Ok(count > 0)
    }

    /// Marks the item published if it still is pending.
    async fn complete(&self, item_id: OutboxItemId) -> Result<(), PipelineError> {
        if self.ctx.outbox.mark_published(item_id, self.ctx.now()).await? {
            self.ctx.emit(PipelineEvent::ProcessingCompleted { item_id });
        }
        Ok(())
    }

    /// Delivers to every inbox in order and returns the ones worth retrying.
    async fn deliver_all(
        &self,
        item_id: OutboxItemId,
        actor: &LocalActor,
        activity: &Activity,
        inboxes: &[Inbox],
    ) -> Result<Vec<Inbox>, PipelineError> {
        let body = serde_json::to_vec(activity.as_value()).map_err(StoreError::from)?;
        let mut failed = Vec::new();

        for inbox in inboxes {
            let request = DeliveryRequest {
                inbox: inbox.clone(),
                headers: self.ctx.signer.sign(actor, inbox, &body),
                body: body.clone(),
            };
            let result = self.ctx.transport.deliver(&request).await;
            let outcome = DeliveryOutcome::classify(&result);
            let (status, error) = match &result {
                Ok(response) => (Some(response.status), None),
                Err(e) => (None, Some(e.to_string())),
            };
            self.ctx.emit(PipelineEvent::DeliveryAttempted {
                item_id,
                inbox: inbox.to_string(),
                status,
                outcome,
                error,
            });
            if outcome == DeliveryOutcome::Retryable {
                failed.push(inbox.clone());
            }
        }

        Ok(failed)
    }

    /// Stores `failed` as a retry batch and schedules it, or drops it once
    /// the policy's ceiling is reached. `failed_attempt` is 0 for the
    /// initial delivery.
    async fn schedule_retry(
        &self,
        item_id: OutboxItemId,
        failed: Vec<Inbox>,
        failed_attempt: u32,
    ) -> Result<(), PipelineError> {
        if failed.is_empty() {
            return Ok(());
        }

        match self.retry_policy.decide(failed_attempt) {
            RetryDecision::Retry { attempt, delay } => {
                let now = self.ctx.now();
                let key = self.ctx.ids.retry_key();
                let endpoints = failed.len();
                self.ctx
                    .retries
                    .put(&RetryBatch {
                        key,
                        item_id,
                        endpoints: failed.into_iter().map(|i| i.as_str().to_string()).collect(),
                        attempt,
                        created_at: now,
                        expires_at: after(now, self.retry_policy.ttl),
                    })
                    .await?;
                self.ctx
                    .schedule(
                        &RetryActivity {
                            retry_key: key,
                            item_id,
                            attempt,
                        },
                        delay,
                    )
                    .await?;
                self.ctx.emit(PipelineEvent::RetryScheduled {
                    item_id,
                    key,
                    attempt,
                    endpoints,
                    run_at: after(now, delay),
                });
            }
            RetryDecision::Drop { reason } => {
                self.ctx.emit(PipelineEvent::RetryDropped {
                    item_id,
                    endpoints: failed.len(),
                    reason,
                });
            }
        }
        Ok(())
    }
}
