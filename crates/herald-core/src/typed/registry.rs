//! TriggerRegistry - handler の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynStepHandler, StepHandler, TypedStepHandler};
use super::trigger::Trigger;

/// TriggerRegistry は型付き StepHandler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TriggerRegistry::new();
/// registry.register::<Reindex, _>(ReindexHandler)?;
///
/// let handler = registry.get("reindex");
/// ```
///
/// `seal()` 以降の登録は RegistryError::Sealed になる。
#[derive(Default)]
pub struct TriggerRegistry {
    handlers: HashMap<String, Arc<dyn DynStepHandler>>,
    sealed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for trigger '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("registry is sealed; trigger '{0}' registered too late")]
    Sealed(String),
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Trigger, H: StepHandler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = T::NAME.to_string();
        if self.sealed {
            return Err(RegistryError::Sealed(name));
        }
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers
            .insert(name, Arc::new(TypedStepHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, trigger: &str) -> Option<Arc<dyn DynStepHandler>> {
        self.handlers.get(trigger).cloned()
    }

    /// Registered trigger names, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
