//! In-memory implementations of the store and scheduler ports.
//!
//! Used by tests and by single-process setups that accept losing state on
//! restart. Each store keeps its state behind a `tokio::sync::Mutex`.

mod lock;
mod outbox;
mod retry;
mod scheduler;

pub use lock::InMemoryLockStore;
pub use outbox::InMemoryOutboxStore;
pub use retry::InMemoryRetryStore;
pub use scheduler::InMemoryTaskScheduler;
