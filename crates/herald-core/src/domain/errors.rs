//! Errors - パイプラインのエラー型
//!
//! 宛先ごとの配送失敗は `TransportError` (delivery.rs) で分類する。
//! ここにあるのはジョブ単位・呼び出し単位のエラー。

use thiserror::Error;

use super::ids::OutboxItemId;

/// Failure of a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Failure of the external actor directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("invalid directory data: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The activity's actor or object could not be resolved.
    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("outbox item not found: {0}")]
    ItemNotFound(OutboxItemId),

    #[error("no handler registered for trigger {0}")]
    UnknownTrigger(String),

    #[error("duplicate handler for trigger {0}")]
    DuplicateTrigger(String),

    #[error("invalid step arguments: {0}")]
    Payload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("step panicked: {0}")]
    StepPanicked(String),
}

impl PipelineError {
    /// Errors that a later run of the same step cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::Resolution(_)
                | PipelineError::ItemNotFound(_)
                | PipelineError::UnknownTrigger(_)
                | PipelineError::DuplicateTrigger(_)
                | PipelineError::Payload(_)
        )
    }
}
