//! PipelineBuilder - pipeline の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 組み込み trigger（process-outbox など）は build() が必ず登録する
//! - register() で追加の callback（メンテナンス job など）を登録できる
//! - expect_triggers() で期待集合を宣言し、build() 時に
//!   「期待集合 ⊆ 登録済み集合」をチェックする
//! - build() の最後に registry を seal する

use std::sync::Arc;

use crate::app::batch::BatchScheduler;
use crate::app::context::PipelineContext;
use crate::app::dispatcher::Dispatcher;
use crate::app::gc::GcLoop;
use crate::app::lock::LockManager;
use crate::app::outbox::OutboxService;
use crate::app::recipients::{DefaultRecipientResolver, RecipientResolver};
use crate::app::status::OutboxCounts;
use crate::app::sweep::StuckItemSweep;
use crate::app::triggers::{
    ProcessOutbox, ProcessOutboxHandler, PurgeOutbox, PurgeOutboxHandler, RetryActivity,
    RetryActivityHandler, SendToFollowers, SendToFollowersHandler,
};
use crate::app::worker::{Worker, WorkerGroup, run_every};
use crate::config::{ConfigError, PipelineConfig};
use crate::domain::{PipelineError, StoreError};
use crate::typed::{StepHandler, Trigger};

type Registration = Box<dyn FnOnce(&BatchScheduler) -> Result<(), PipelineError> + Send>;

/// BuildError は pipeline 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing triggers: {0:?}. These triggers were expected but not registered.")]
    MissingTriggers(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registration(#[from] PipelineError),
}

/// # 使用例
/// ```ignore
/// let pipeline = PipelineBuilder::new(ctx, config)
///     .register::<Reindex, _>(ReindexHandler)
///     .expect_triggers(&["reindex"])
///     .build()?;
/// ```
pub struct PipelineBuilder {
    ctx: PipelineContext,
    config: PipelineConfig,
    resolver: Option<Arc<dyn RecipientResolver>>,
    registrations: Vec<Registration>,
    expected_triggers: Option<Vec<String>>,
}

impl PipelineBuilder {
    pub fn new(ctx: PipelineContext, config: PipelineConfig) -> Self {
        Self {
            ctx,
            config,
            resolver: None,
            registrations: Vec::new(),
            expected_triggers: None,
        }
    }

    /// Replaces the default mention/reply/relay resolver.
    pub fn resolver(mut self, resolver: Arc<dyn RecipientResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Registers an extra callback alongside the built-in ones.
    pub fn register<T, H>(mut self, handler: H) -> Self
    where
        T: Trigger,
        H: StepHandler<T> + 'static,
    {
        self.registrations
            .push(Box::new(move |batch| batch.register_callback::<T, H>(handler)));
        self
    }

    pub fn expect_triggers(mut self, triggers: &[&str]) -> Self {
        self.expected_triggers = Some(triggers.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;
        let ctx = self.ctx;
        let config = self.config;

        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(DefaultRecipientResolver::new(
                ctx.directory.clone(),
                config.relay_inboxes(),
            ))
        });
        let dispatcher = Arc::new(Dispatcher::new(
            ctx.clone(),
            resolver,
            config.retry_policy(),
            config.batch_size,
        ));
        let locks = LockManager::new(ctx.locks.clone(), ctx.clock.clone(), config.lock_stale_after());
        let batch = Arc::new(BatchScheduler::new(
            ctx.clone(),
            locks.clone(),
            config.continuation_delay(),
            config.contention_delay(),
        ));

        batch.register_callback::<ProcessOutbox, _>(ProcessOutboxHandler::new(dispatcher.clone()))?;
        batch.register_callback::<SendToFollowers, _>(SendToFollowersHandler::new(
            dispatcher.clone(),
        ))?;
        batch.register_callback::<RetryActivity, _>(RetryActivityHandler::new(dispatcher.clone()))?;
        batch.register_callback::<PurgeOutbox, _>(PurgeOutboxHandler::new(ctx.outbox.clone()))?;
        for registration in self.registrations {
            registration(batch.as_ref())?;
        }

        if let Some(expected) = &self.expected_triggers {
            let registered = batch.registered();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTriggers(missing));
            }
        }
        batch.seal();

        Ok(Pipeline {
            outbox: OutboxService::new(ctx.clone()),
            sweep: StuckItemSweep::new(ctx.clone(), locks, config.stuck_after()),
            gc: GcLoop::new(ctx.clone(), config.lock_stale_after()),
            dispatcher,
            batch,
            ctx,
            config,
        })
    }
}

/// A wired pipeline.
pub struct Pipeline {
    pub ctx: PipelineContext,
    pub config: PipelineConfig,
    pub outbox: OutboxService,
    pub dispatcher: Arc<Dispatcher>,
    pub batch: Arc<BatchScheduler>,
    pub sweep: StuckItemSweep,
    pub gc: GcLoop,
}

impl Pipeline {
    pub fn worker(&self) -> Worker {
        Worker::new(
            self.ctx.clone(),
            self.batch.clone(),
            self.config.visibility_timeout(),
        )
    }

    /// Spawns the worker loops plus the sweep and GC loops.
    pub fn spawn(&self) -> WorkerGroup {
        let mut group = WorkerGroup::spawn(
            self.config.workers,
            self.worker(),
            self.config.poll_interval(),
        );

        let sweep = self.sweep.clone();
        let interval = self.config.sweep_interval();
        group.attach(move |shutdown| {
            run_every("stuck-item-sweep", interval, shutdown, move || {
                let sweep = sweep.clone();
                async move {
                    if let Err(e) = sweep.run_once().await {
                        tracing::warn!(error = %e, "stuck item sweep failed");
                    }
                }
            })
        });

        let gc = self.gc.clone();
        group.attach(move |shutdown| {
            run_every("gc", interval, shutdown, move || {
                let gc = gc.clone();
                async move {
                    if let Err(e) = gc.run_once().await {
                        tracing::warn!(error = %e, "garbage collection failed");
                    }
                }
            })
        });

        group
    }

    pub async fn status(&self) -> Result<OutboxCounts, StoreError> {
        OutboxCounts::snapshot(&self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::triggers::BUILTIN_TRIGGERS;
    use crate::domain::{DeliveryResponse, TransportError};
    use crate::impls::StaticActorDirectory;
    use crate::ports::{DeliveryRequest, DeliveryTransport, SystemClock};
    use crate::typed::handler::tests::{Countdown, CountdownHandler};
    use async_trait::async_trait;

    struct Accepting;

    #[async_trait]
    impl DeliveryTransport for Accepting {
        async fn deliver(&self, _: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
            Ok(DeliveryResponse::new(202))
        }
    }

    fn context() -> PipelineContext {
        PipelineContext::in_memory(
            Arc::new(StaticActorDirectory::new("https://local.example")),
            Arc::new(Accepting),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn build_registers_builtin_triggers() {
        let pipeline = PipelineBuilder::new(context(), PipelineConfig::default())
            .expect_triggers(&BUILTIN_TRIGGERS)
            .build()
            .unwrap();
        let mut expected: Vec<String> = BUILTIN_TRIGGERS.iter().map(|t| t.to_string()).collect();
        expected.sort();
        assert_eq!(pipeline.batch.registered(), expected);
    }

    #[test]
    fn build_missing_triggers() {
        let result = PipelineBuilder::new(context(), PipelineConfig::default())
            .expect_triggers(&[ProcessOutbox::NAME, Countdown::NAME])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTriggers(missing)) if missing == vec![Countdown::NAME.to_string()]
        ));
    }

    #[test]
    fn extra_callbacks_are_registered_before_seal() {
        let pipeline = PipelineBuilder::new(context(), PipelineConfig::default())
            .register::<Countdown, _>(CountdownHandler)
            .expect_triggers(&[Countdown::NAME])
            .build()
            .unwrap();
        assert!(pipeline.batch.registered().contains(&"countdown".to_string()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        let result = PipelineBuilder::new(context(), config).build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn builtin_trigger_cannot_be_registered_twice() {
        let result = PipelineBuilder::new(context(), PipelineConfig::default())
            .register::<ProcessOutbox, _>(NoopProcessHandler)
            .build();
        assert!(matches!(
            result,
            Err(BuildError::Registration(PipelineError::DuplicateTrigger(_)))
        ));
    }

    struct NoopProcessHandler;

    #[async_trait]
    impl StepHandler<ProcessOutbox> for NoopProcessHandler {
        async fn run(&self, _: ProcessOutbox) -> Result<Option<ProcessOutbox>, PipelineError> {
            Ok(None)
        }
    }
}
