//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock の時刻 + 乱数で ULID を作る

use crate::domain::ids::{Id, IdMarker, OutboxItemId, RetryKey, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の worker から使う）
pub trait IdGenerator: Send + Sync {
    fn item_id(&self) -> OutboxItemId;

    fn retry_key(&self) -> RetryKey;

    fn task_id(&self) -> TaskId;
}

/// Clock の現在時刻を timestamp 部分に使う ULID 生成器
///
/// FixedClock と組み合わせるとテストで timestamp が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn item_id(&self) -> OutboxItemId {
        self.next()
    }

    fn retry_key(&self) -> RetryKey {
        self.next()
    }

    fn task_id(&self) -> TaskId {
        self.next()
    }
}
