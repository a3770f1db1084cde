//! StepHandler trait - Trigger を実行する handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (StepHandler<T>)
//! - Object-safe trait (DynStepHandler)
//! - Type erasure パターン (TypedStepHandler<T, H> → DynStepHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::trigger::Trigger;
use crate::domain::PipelineError;

/// StepHandler は 1 step を実行し、続きがあれば次の引数を返す
///
/// # 使用例
/// ```ignore
/// struct ReindexHandler;
///
/// #[async_trait]
/// impl StepHandler<Reindex> for ReindexHandler {
///     async fn run(&self, args: Reindex) -> Result<Option<Reindex>, PipelineError> {
///         let done = reindex_page(args.offset).await?;
///         Ok((!done).then(|| Reindex { offset: args.offset + 100 }))
///     }
/// }
/// ```
///
/// - `Ok(None)`: このバッチは完了
/// - `Ok(Some(next))`: `next` を引数に同じ trigger をもう一度
#[async_trait]
pub trait StepHandler<T: Trigger>: Send + Sync {
    async fn run(&self, args: T) -> Result<Option<T>, PipelineError>;
}

/// DynStepHandler は object-safe な StepHandler の抽象化
///
/// 引数と continuation は JSON のまま受け渡す。
/// HashMap<String, Arc<dyn DynStepHandler>> に格納できる。
#[async_trait]
pub trait DynStepHandler: Send + Sync {
    async fn run_dyn(
        &self,
        args: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, PipelineError>;

    fn trigger(&self) -> &'static str;

    fn batched(&self) -> bool;
}

pub struct TypedStepHandler<T: Trigger, H: StepHandler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Trigger, H: StepHandler<T>> TypedStepHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Trigger, H: StepHandler<T>> DynStepHandler for TypedStepHandler<T, H> {
    async fn run_dyn(
        &self,
        args: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, PipelineError> {
        let args: T = serde_json::from_value(args)
            .map_err(|e| PipelineError::Payload(format!("{}: {e}", T::NAME)))?;
        match self.handler.run(args).await? {
            Some(next) => serde_json::to_value(&next)
                .map(Some)
                .map_err(|e| PipelineError::Payload(format!("{}: {e}", T::NAME))),
            None => Ok(None),
        }
    }

    fn trigger(&self) -> &'static str {
        T::NAME
    }

    fn batched(&self) -> bool {
        T::BATCHED
    }
}
