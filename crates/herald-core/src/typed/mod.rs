//! Typed - 型付き Trigger API
//!
//! trigger 名の typo を型で排除し、handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Trigger` trait, `StepHandler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynStepHandler` trait - object-safe, type erasure

pub mod handler;
pub mod registry;
pub mod trigger;

pub use self::handler::{DynStepHandler, StepHandler, TypedStepHandler};
pub use self::registry::{RegistryError, TriggerRegistry};
pub use self::trigger::Trigger;
