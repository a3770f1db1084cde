//! Trigger trait - 型付きの step 引数
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`, `const BATCHED`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::OutboxItemId;

/// Trigger は trigger 名と引数の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Reindex {
///     offset: usize,
/// }
///
/// impl Trigger for Reindex {
///     const NAME: &'static str = "reindex";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: TaskScheduler に JSON で保存するため
/// - `Send + Sync + 'static`: worker task 間で受け渡すため
pub trait Trigger: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name stored with every scheduled task.
    const NAME: &'static str;

    /// Whether steps run under the per-callback lock.
    const BATCHED: bool = true;

    /// Outbox item the step works on, if any.
    fn item_id(&self) -> Option<OutboxItemId> {
        None
    }
}
