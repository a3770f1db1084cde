//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。永続化（SQLite / InMemory）、
//! 配送（HTTP）、actor ディレクトリなど外部との境界をここで trait にする。
//!
//! # 設計原則
//! - OutboxStore が item の正本
//! - TaskScheduler は「いつ何を実行するか」だけを持つ
//! - LockStore は同一 callback の同時実行を防ぐ唯一の手段

pub mod clock;
pub mod directory;
pub mod event_sink;
pub mod id_generator;
pub mod lock_store;
pub mod outbox_store;
pub mod retry_store;
pub mod scheduler;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::directory::{ActorDirectory, LocalActor};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock_store::LockStore;
pub use self::outbox_store::OutboxStore;
pub use self::retry_store::RetryStore;
pub use self::scheduler::TaskScheduler;
pub use self::transport::{DeliveryRequest, DeliveryTransport, RequestSigner, UnsignedRequests};
