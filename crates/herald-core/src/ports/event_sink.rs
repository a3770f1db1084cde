//! EventSink port - 観測イベントの出口
//!
//! 実装: TracingEventSink（デフォルト）、NoopEventSink、RecordingEventSink（テスト用）

use std::sync::Arc;

use crate::domain::PipelineEvent;

/// 失敗しない・ブロックしない。ログやメトリクスへの fan-out 専用。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: &PipelineEvent) {
        (**self).emit(event)
    }
}
