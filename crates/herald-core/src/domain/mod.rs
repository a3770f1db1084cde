//! Domain model (ids, activities, outbox items, retries, tasks, events, errors).

pub mod activity;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod ids;
pub mod lock;
pub mod outbox;
pub mod retry;
pub mod task;

pub use activity::{Activity, ActivityType, ActorKind, PUBLIC_AUDIENCE, Visibility};
pub use delivery::{DeliveryOutcome, DeliveryResponse, Inbox, TransportError};
pub use errors::{DirectoryError, PipelineError, StoreError};
pub use events::{PipelineEvent, SendStage};
pub use ids::{OutboxItemId, RetryKey, TaskId};
pub use lock::{Acquire, LockRecord};
pub use outbox::{NewOutboxItem, OutboxItem, OutboxStatus, SupersededQuery};
pub use retry::{RetryBatch, RetryDecision, RetryPolicy};
pub use task::{ScheduledTask, TaskEnvelope, TriggerName};
