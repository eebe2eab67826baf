//! Command provider lookup by command kind.

use std::collections::HashMap;
use std::sync::Arc;

use super::checks::UpdateCheck;
use super::cmdprovider::{AirgapUpdateProvider, K0sUpdateProvider, TargetEngine};
use super::core::PlanCommandProvider;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn PlanCommandProvider>>,
}

impl ProviderRegistry {
    /// Registry with the built-in update providers sharing `engine`. k0s
    /// updates are gated on `check`.
    pub fn with_defaults(engine: Arc<TargetEngine>, check: Arc<dyn UpdateCheck>) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(K0sUpdateProvider::new(engine.clone(), check)));
        registry.register(Arc::new(AirgapUpdateProvider::new(engine)));
        registry
    }

    /// Register a provider under its kind, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn PlanCommandProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn PlanCommandProvider>> {
        self.providers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
