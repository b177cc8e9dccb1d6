//! Site adapters and the registry the orchestrator dispatches through.

pub mod dedup;
pub mod doctolib;
pub mod http;
pub mod jameda;
pub mod pacing;
pub mod parse;

pub use dedup::ProviderDedup;
pub use doctolib::DoctolibAdapter;
pub use http::HttpContext;
pub use jameda::JamedaAdapter;
pub use pacing::RequestPacer;

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::adapter::SiteAdapter;
use crate::types::target::Target;

/// Target to adapter lookup table.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Target, Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapter for every supported target.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_adapter(JamedaAdapter::new())
            .with_adapter(DoctolibAdapter::new())
    }

    /// Register an adapter under its own target, replacing any previous one.
    pub fn with_adapter(mut self, adapter: impl SiteAdapter + 'static) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) {
        self.adapters.insert(adapter.target(), adapter);
    }

    pub fn get(&self, target: Target) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.get(&target).cloned()
    }

    /// Registered targets in stable order.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.adapters.keys().copied().collect();
        targets.sort();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_targets() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(registry.targets(), Target::ALL.to_vec());
        for target in Target::ALL {
            assert_eq!(registry.get(target).unwrap().target(), target);
        }
        assert!(AdapterRegistry::new().get(Target::Jameda).is_none());
    }
}
