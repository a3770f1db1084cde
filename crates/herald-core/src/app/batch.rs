//! BatchScheduler - 再開可能な step 実行
//!
//! 登録済み callback を 1 step ずつ実行する。
//!
//! # フロー（batched な trigger）
//! 1. callback 名からロックキーを作る（引数は含めない）
//! 2. ロック中なら同じ envelope を contention_delay 後に再予約して終わり
//! 3. ロックを取って callback を実行、結果に関わらず解放
//! 4. 続きの引数が返れば continuation_delay 後に同じ trigger を予約

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::context::PipelineContext;
use crate::app::lock::{LockManager, LockOutcome};
use crate::domain::{PipelineError, TaskEnvelope, TaskId};
use crate::typed::{DynStepHandler, RegistryError, StepHandler, Trigger, TriggerRegistry};

/// What a step run left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReport {
    Completed,

    /// The callback returned a continuation, scheduled as `task_id`.
    Continued { task_id: TaskId },

    /// The lock was held; the same invocation was rescheduled as `task_id`.
    Contended { task_id: TaskId },
}

pub struct BatchScheduler {
    ctx: PipelineContext,
    registry: RwLock<TriggerRegistry>,
    locks: LockManager,
    continuation_delay: Duration,
    contention_delay: Duration,
}

impl BatchScheduler {
    pub fn new(
        ctx: PipelineContext,
        locks: LockManager,
        continuation_delay: Duration,
        contention_delay: Duration,
    ) -> Self {
        Self {
            ctx,
            registry: RwLock::new(TriggerRegistry::new()),
            locks,
            continuation_delay,
            contention_delay,
        }
    }

    /// Registers the callback for trigger `T`.
    ///
    /// Registering after [`seal`](Self::seal) is logged and ignored.
    pub fn register_callback<T: Trigger, H: StepHandler<T> + 'static>(
        &self,
        handler: H,
    ) -> Result<(), PipelineError> {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.register::<T, H>(handler) {
            Ok(()) => {
                debug!(trigger = T::NAME, batched = T::BATCHED, "callback registered");
                Ok(())
            }
            Err(RegistryError::AlreadyRegistered(name)) => {
                Err(PipelineError::DuplicateTrigger(name))
            }
            Err(RegistryError::Sealed(name)) => {
                warn!(trigger = %name, "callback registered after startup, ignoring");
                Ok(())
            }
        }
    }

    pub fn seal(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .seal();
    }

    pub fn registered(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registered()
    }

    fn handler(&self, trigger: &str) -> Result<Arc<dyn DynStepHandler>, PipelineError> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(trigger)
            .ok_or_else(|| PipelineError::UnknownTrigger(trigger.to_string()))
    }

    /// Runs one step of `envelope`'s trigger.
    pub async fn run_step(&self, envelope: &TaskEnvelope) -> Result<StepReport, PipelineError> {
        let handler = self.handler(envelope.trigger().as_str())?;

        if !handler.batched() {
            let next = handler.run_dyn(envelope.args().clone()).await?;
            return self.continue_with(envelope, next).await;
        }

        let key = LockManager::key_for(handler.trigger());
        let args = envelope.args().clone();
        let body = async move { handler.run_dyn(args).await };

        match self.locks.run_locked(&key, body).await? {
            LockOutcome::Ran(next) => self.continue_with(envelope, next).await,
            LockOutcome::Contended { since } => {
                let task_id = self
                    .ctx
                    .schedule_envelope(envelope.clone(), self.contention_delay)
                    .await?;
                debug!(
                    trigger = %envelope.trigger(),
                    held_since = %since,
                    task_id = %task_id,
                    "callback busy, step rescheduled"
                );
                Ok(StepReport::Contended { task_id })
            }
        }
    }

    async fn continue_with(
        &self,
        envelope: &TaskEnvelope,
        next: Option<serde_json::Value>,
    ) -> Result<StepReport, PipelineError> {
        let Some(args) = next else {
            return Ok(StepReport::Completed);
        };
        let task_id = self
            .ctx
            .schedule_envelope(envelope.with_args(args), self.continuation_delay)
            .await?;
        debug!(trigger = %envelope.trigger(), task_id = %task_id, "continuation scheduled");
        Ok(StepReport::Continued { task_id })
    }
}
