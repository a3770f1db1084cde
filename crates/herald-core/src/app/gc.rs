//! GcLoop - 期限切れ retry batch と stale ロックの掃除

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::app::context::PipelineContext;
use crate::domain::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub retry_batches: usize,
    pub locks: usize,
}

#[derive(Clone)]
pub struct GcLoop {
    ctx: PipelineContext,
    lock_stale_after: Duration,
}

impl GcLoop {
    pub fn new(ctx: PipelineContext, lock_stale_after: Duration) -> Self {
        Self {
            ctx,
            lock_stale_after,
        }
    }

    pub async fn run_once(&self) -> Result<GcReport, StoreError> {
        let now = self.ctx.now();
        let report = GcReport {
            retry_batches: self.ctx.retries.purge_expired(now).await?,
            locks: self.ctx.locks.purge_stale(now, self.lock_stale_after).await?,
        };
        debug!(
            retry_batches = report.retry_batches,
            locks = report.locks,
            "garbage collected"
        );
        Ok(report)
    }
}
