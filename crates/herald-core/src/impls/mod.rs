//! Impls - ports の実装
//!
//! - memory: InMemory の store / scheduler（テスト・開発用）
//! - sqlite: SQLite の store / scheduler（feature = "sqlite"）
//! - http: reqwest による配送（feature = "http"）
//! - directory: JSON で定義する actor ディレクトリ
//! - events: EventSink 実装

pub mod directory;
pub mod events;
pub mod memory;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use directory::StaticActorDirectory;
pub use events::{NoopEventSink, RecordingEventSink, TracingEventSink};
pub use memory::{InMemoryLockStore, InMemoryOutboxStore, InMemoryRetryStore, InMemoryTaskScheduler};
