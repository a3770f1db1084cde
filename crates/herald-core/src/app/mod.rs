//! App - アプリケーション層
//!
//! ports を組み合わせて配送パイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **PipelineBuilder**: パイプラインの構築とワイヤリング
//! - **OutboxService**: enqueue / 置き換え無効化 / undo / 再送
//! - **Dispatcher**: 追加宛先への送信、follower への分割配送、リトライ
//! - **BatchScheduler**: ロック付きの再開可能な step 実行
//! - **LockManager**: callback 単位の排他
//! - **Worker / WorkerGroup**: 予定済み task の実行ループ
//! - **StuckItemSweep / GcLoop**: 取り残し item の再起動と期限切れレコードの掃除

pub mod batch;
pub mod builder;
pub mod context;
pub mod dispatcher;
pub mod gc;
pub mod lock;
pub mod outbox;
pub mod recipients;
pub mod status;
pub mod sweep;
pub mod triggers;
pub mod worker;

// 主要な型を再エクスポート
pub use self::batch::{BatchScheduler, StepReport};
pub use self::builder::{BuildError, Pipeline, PipelineBuilder};
pub use self::context::PipelineContext;
pub use self::dispatcher::Dispatcher;
pub use self::gc::{GcLoop, GcReport};
pub use self::lock::{LockManager, LockOutcome};
pub use self::outbox::{OutboxService, reconstruct_activity};
pub use self::recipients::{DefaultRecipientResolver, RecipientResolver};
pub use self::status::OutboxCounts;
pub use self::sweep::StuckItemSweep;
pub use self::triggers::{BUILTIN_TRIGGERS, ProcessOutbox, PurgeOutbox, RetryActivity, SendToFollowers};
pub use self::worker::{Worker, WorkerGroup};
