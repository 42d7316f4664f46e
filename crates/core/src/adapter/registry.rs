//! Immutable capability to adapter mapping.

use std::collections::HashMap;
use std::sync::Arc;

use super::traits::AgentAdapter;
use super::types::Capability;

/// Mapping from capability to the adapter serving it.
///
/// Built once and injected into the engine; never mutated afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Capability, Arc<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    /// Adapter for a capability, if one is registered.
    pub fn get(&self, capability: Capability) -> Option<&Arc<dyn AgentAdapter>> {
        self.adapters.get(&capability)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.adapters.contains_key(&capability)
    }

    /// Registered capabilities, sorted.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<_> = self.adapters.keys().copied().collect();
        caps.sort();
        caps
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.adapters.iter().map(|(cap, a)| (cap, a.name())))
            .finish()
    }
}

/// Builder for [`AdapterRegistry`].
#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: HashMap<Capability, Arc<dyn AgentAdapter>>,
}

impl AdapterRegistryBuilder {
    /// Register an adapter for one capability. Later registrations win.
    pub fn with(mut self, capability: Capability, adapter: Arc<dyn AgentAdapter>) -> Self {
        self.adapters.insert(capability, adapter);
        self
    }

    /// Register the same adapter for every capability.
    pub fn with_all(mut self, adapter: Arc<dyn AgentAdapter>) -> Self {
        for capability in Capability::ALL {
            self.adapters.insert(capability, Arc::clone(&adapter));
        }
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: self.adapters,
        }
    }
}
