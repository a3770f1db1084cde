//! Worker - 予定済み task を lease して BatchScheduler に流す
//!
//! # ack 方針
//! - 成功: ack
//! - 恒久的なエラー（未登録 trigger、引数不正など）: ログを出して ack
//! - 一時的なエラー: ack しない → visibility timeout 後に再配送

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::batch::{BatchScheduler, StepReport};
use crate::app::context::PipelineContext;
use crate::domain::{ScheduledTask, StoreError, TaskId};

/// Leases one due task at a time and runs it.
#[derive(Clone)]
pub struct Worker {
    ctx: PipelineContext,
    batch: Arc<BatchScheduler>,
    visibility_timeout: Duration,
}

impl Worker {
    pub fn new(ctx: PipelineContext, batch: Arc<BatchScheduler>, visibility_timeout: Duration) -> Self {
        Self {
            ctx,
            batch,
            visibility_timeout,
        }
    }

    /// Runs the next due task, if any, and returns its id.
    pub async fn run_next(&self) -> Result<Option<TaskId>, StoreError> {
        let leased = self
            .ctx
            .scheduler
            .lease_due(self.ctx.now(), self.visibility_timeout, 1)
            .await?;
        let Some(task) = leased.into_iter().next() else {
            return Ok(None);
        };
        let id = task.id;
        self.execute(task).await?;
        Ok(Some(id))
    }

    /// Runs due tasks until none is left. Tasks scheduled into the future
    /// by the steps themselves are not waited for.
    pub async fn drain(&self) -> Result<usize, StoreError> {
        let mut ran = 0;
        while self.run_next().await?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    async fn execute(&self, task: ScheduledTask) -> Result<(), StoreError> {
        let trigger = task.envelope.trigger().clone();
        match self.batch.run_step(&task.envelope).await {
            Ok(report) => {
                match report {
                    StepReport::Completed => debug!(task_id = %task.id, trigger = %trigger, "step completed"),
                    StepReport::Continued { task_id } => {
                        debug!(task_id = %task.id, trigger = %trigger, next = %task_id, "step continued")
                    }
                    StepReport::Contended { task_id } => {
                        debug!(task_id = %task.id, trigger = %trigger, retry = %task_id, "step contended")
                    }
                }
                self.ctx.scheduler.ack(task.id).await?;
            }
            Err(err) if err.is_permanent() => {
                error!(
                    task_id = %task.id,
                    trigger = %trigger,
                    error = %err,
                    "step failed permanently, dropping task"
                );
                self.ctx.scheduler.ack(task.id).await?;
            }
            Err(err) => {
                warn!(
                    task_id = %task.id,
                    trigger = %trigger,
                    deliveries = task.deliveries,
                    error = %err,
                    "step failed, leaving task for redelivery"
                );
            }
        }
        Ok(())
    }
}

/// Worker group handle.
/// - `request_shutdown()` で全 loop に停止を伝える
/// - `shutdown_and_join()` で全 loop の終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` worker loops.
    pub fn spawn(n: usize, worker: Worker, poll_interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut group = Self {
            shutdown_tx,
            joins: Vec::with_capacity(n),
        };
        for worker_id in 0..n {
            let worker = worker.clone();
            group.attach(move |shutdown| worker_loop(worker_id, worker, poll_interval, shutdown));
        }
        group
    }

    /// Spawns another loop that stops with the group.
    pub fn attach<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let join = tokio::spawn(f(self.shutdown_tx.subscribe()));
        self.joins.push(join);
    }

    /// Request shutdown for all loops.
    /// In-flight steps run to completion; no new task is leased.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    worker: Worker,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match worker.run_next().await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => warn!(worker_id, error = %e, "failed to lease or ack task"),
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    info!(worker_id, "worker stopped");
}

/// Runs `tick` every `interval` until shutdown. Used by the sweep and GC loops.
pub async fn run_every<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    debug!(loop_name = name, interval_secs = interval.as_secs(), "loop started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => tick().await,
        }
        if *shutdown_rx.borrow() {
            break;
        }
    }
    debug!(loop_name = name, "loop stopped");
}
