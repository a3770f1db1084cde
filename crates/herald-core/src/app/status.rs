//! Status - outbox の件数スナップショット

use serde::{Deserialize, Serialize};

use crate::app::context::PipelineContext;
use crate::domain::{OutboxStatus, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub published: usize,
    pub scheduled_tasks: usize,
    pub retry_batches: usize,
}

impl OutboxCounts {
    pub async fn snapshot(ctx: &PipelineContext) -> Result<Self, StoreError> {
        Ok(Self {
            pending: ctx.outbox.count(OutboxStatus::Pending).await?,
            published: ctx.outbox.count(OutboxStatus::Published).await?,
            scheduled_tasks: ctx.scheduler.count().await?,
            retry_batches: ctx.retries.count().await?,
        })
    }
}
