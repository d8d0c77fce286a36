//! # Provider Registry (C2)
//!
//! Maps provider name to its adapter and descriptor, and maintains a
//! secondary `model → provider` index for default resolution (spec.md
//! §4.2). Rebuilt wholesale on [`ProviderRegistry::reload`].

use crate::config::ProviderDescriptor;
use crate::providers::Provider;
use dashmap::DashMap;
use std::sync::Arc;

pub struct ProviderEntry {
    pub adapter: Arc<dyn Provider>,
    pub descriptor: ProviderDescriptor,
}

/// Order providers were registered in, used to break ties when several
/// providers list the same model (spec.md §4.2: "first-added wins").
pub struct ProviderRegistry {
    entries: DashMap<String, ProviderEntry>,
    insertion_order: std::sync::RwLock<Vec<String>>,
    model_index: DashMap<String, String>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            insertion_order: std::sync::RwLock::new(Vec::new()),
            model_index: DashMap::new(),
        }
    }

    /// Register a provider, validating its descriptor first (spec.md
    /// §4.2). Rebuilds the model index incrementally, respecting
    /// first-added-wins for shared models.
    pub fn register(
        &self,
        adapter: Arc<dyn Provider>,
        descriptor: ProviderDescriptor,
    ) -> Result<(), String> {
        descriptor.validate()?;
        let name = descriptor.name.clone();

        for model in &descriptor.models {
            self.model_index
                .entry(model.clone())
                .or_insert_with(|| name.clone());
        }

        if !self.entries.contains_key(&name) {
            self.insertion_order.write().unwrap().push(name.clone());
        }
        self.entries.insert(name, ProviderEntry { adapter, descriptor });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.entries.get(name).map(|e| e.adapter.clone())
    }

    pub fn descriptor(&self, name: &str) -> Option<ProviderDescriptor> {
        self.entries.get(name).map(|e| e.descriptor.clone())
    }

    pub fn update_descriptor(&self, name: &str, descriptor: ProviderDescriptor) -> Result<(), String> {
        descriptor.validate()?;
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.descriptor = descriptor;
            Ok(())
        } else {
            Err(format!("unknown provider {name}"))
        }
    }

    /// Resolve the provider registered for `model` (first-added wins among
    /// providers sharing a model).
    pub fn provider_for_model(&self, model: &str) -> Option<String> {
        self.model_index.get(model).map(|e| e.clone())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.insertion_order.read().unwrap().clone()
    }

    /// List `{model, provider, available}` triples for every registered
    /// model (spec.md §6 `list_models`). Availability is supplied by the
    /// caller since it depends on connection state owned elsewhere.
    pub fn list_models(&self) -> Vec<(String, String)> {
        self.model_index
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Rebuild the model index from scratch against the current
    /// descriptors (spec.md §4.2: "rebuilt on reload").
    pub fn rebuild_model_index(&self) {
        self.model_index.clear();
        for name in self.insertion_order.read().unwrap().iter() {
            if let Some(entry) = self.entries.get(name) {
                for model in &entry.descriptor.models {
                    self.model_index
                        .entry(model.clone())
                        .or_insert_with(|| name.clone());
                }
            }
        }
    }

    pub fn providers_for_model(&self, model: &str) -> Vec<ProviderDescriptor> {
        self.insertion_order
            .read()
            .unwrap()
            .iter()
            .filter_map(|name| self.entries.get(name))
            .filter(|e| e.descriptor.models.contains(model))
            .map(|e| e.descriptor.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use std::collections::{HashMap, HashSet};

    fn descriptor(name: &str, models: &[&str], priority: i64) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            adapter: "mock".to_string(),
            api_key: None,
            base_url: None,
            models: models.iter().map(|m| m.to_string()).collect::<HashSet<_>>(),
            priority,
            rate_limit: None,
            max_retries: 3,
            timeout_ms: 30_000,
            headers: HashMap::new(),
            extra_options: HashMap::new(),
        }
    }

    #[test]
    fn first_added_wins_for_shared_model() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MockProvider::new("a")), descriptor("a", &["m"], 1))
            .unwrap();
        registry
            .register(Arc::new(MockProvider::new("b")), descriptor("b", &["m"], 0))
            .unwrap();

        assert_eq!(registry.provider_for_model("m").as_deref(), Some("a"));
    }

    #[test]
    fn rebuild_respects_insertion_order() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MockProvider::new("a")), descriptor("a", &["m"], 1))
            .unwrap();
        registry
            .register(Arc::new(MockProvider::new("b")), descriptor("b", &["m"], 0))
            .unwrap();
        registry.rebuild_model_index();
        assert_eq!(registry.provider_for_model("m").as_deref(), Some("a"));
    }

    #[test]
    fn rejects_invalid_descriptor() {
        let registry = ProviderRegistry::new();
        let mut bad = descriptor("a", &["m"], -1);
        bad.priority = -1;
        assert!(registry
            .register(Arc::new(MockProvider::new("a")), bad)
            .is_err());
    }
}
