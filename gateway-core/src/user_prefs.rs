//! # User preference resolution (consumed interface, spec.md §4.11)
//!
//! The dispatch engine consults this store when a request carries a
//! `user_id`, so a user's own provider/model pin overrides the registry's
//! default model→provider mapping *for that user's request only* (spec.md
//! §4.9 step 2). spec.md treats the backing store as an external
//! collaborator; [`InMemoryUserPreferences`] is the default implementation,
//! suitable for tests and a single-process deployment with no external
//! persistence layer.

use dashmap::DashMap;

/// A user's pinned provider and model for a given request, or a
/// provider-scoped default model.
pub trait UserPreferences: Send + Sync {
    /// The user's overall default `(provider, model)`, consulted first.
    fn default_provider_and_model(&self, user_id: &str) -> Option<(String, String)>;

    /// The user's default model for a specific provider, consulted when a
    /// request names a provider but not one the user has an overall default
    /// for.
    fn provider_default_model(&self, user_id: &str, provider: &str) -> Option<String>;

    /// All `(provider, model)` pairs the user has ever pinned, for
    /// introspection endpoints.
    fn user_models_by_provider(&self, user_id: &str) -> Vec<(String, String)>;
}

#[derive(Debug, Clone, Default)]
struct UserRecord {
    default_provider_and_model: Option<(String, String)>,
    provider_defaults: Vec<(String, String)>,
}

/// `DashMap`-backed default store (spec.md §4.11: "suitable for tests and
/// single-process deployment; no persistence layer is built").
#[derive(Default)]
pub struct InMemoryUserPreferences {
    records: DashMap<String, UserRecord>,
}

impl InMemoryUserPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&self, user_id: &str, provider: &str, model: &str) {
        let mut entry = self.records.entry(user_id.to_string()).or_default();
        entry.default_provider_and_model = Some((provider.to_string(), model.to_string()));
    }

    pub fn set_provider_default(&self, user_id: &str, provider: &str, model: &str) {
        let mut entry = self.records.entry(user_id.to_string()).or_default();
        entry.provider_defaults.retain(|(p, _)| p != provider);
        entry
            .provider_defaults
            .push((provider.to_string(), model.to_string()));
    }
}

impl UserPreferences for InMemoryUserPreferences {
    fn default_provider_and_model(&self, user_id: &str) -> Option<(String, String)> {
        self.records
            .get(user_id)
            .and_then(|r| r.default_provider_and_model.clone())
    }

    fn provider_default_model(&self, user_id: &str, provider: &str) -> Option<String> {
        self.records.get(user_id).and_then(|r| {
            r.provider_defaults
                .iter()
                .find(|(p, _)| p == provider)
                .map(|(_, m)| m.clone())
        })
    }

    fn user_models_by_provider(&self, user_id: &str) -> Vec<(String, String)> {
        self.records
            .get(user_id)
            .map(|r| r.provider_defaults.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_overrides_registry_resolution() {
        let prefs = InMemoryUserPreferences::new();
        prefs.set_default("alice", "anthropic", "claude-3-opus");
        assert_eq!(
            prefs.default_provider_and_model("alice"),
            Some(("anthropic".to_string(), "claude-3-opus".to_string()))
        );
        assert_eq!(prefs.default_provider_and_model("bob"), None);
    }

    #[test]
    fn provider_default_model_is_per_provider() {
        let prefs = InMemoryUserPreferences::new();
        prefs.set_provider_default("alice", "openai", "gpt-4-turbo");
        prefs.set_provider_default("alice", "anthropic", "claude-3-haiku");
        assert_eq!(
            prefs.provider_default_model("alice", "openai").as_deref(),
            Some("gpt-4-turbo")
        );
        assert_eq!(
            prefs.provider_default_model("alice", "anthropic").as_deref(),
            Some("claude-3-haiku")
        );
    }
}
