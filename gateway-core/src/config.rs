//! # Config Resolver (C3)
//!
//! [`ProviderDescriptor`] is the static configuration record for a provider;
//! this module resolves one from three layers — runtime overrides, a
//! file-sourced value, and an environment variable — with priority
//! runtime > file > environment.
//!
//! The merge itself ([`ConfigResolver::resolve`]) takes in-memory layers and
//! is a pure function of its inputs: no file I/O happens here. Locating the
//! config file and reading environment variables from the process is
//! `gateway-service`'s job; this keeps the merge logic unit-testable without
//! touching the filesystem.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitWindow {
    Second,
    Minute,
    Hour,
}

impl RateLimitWindow {
    pub fn as_duration(self) -> std::time::Duration {
        match self {
            RateLimitWindow::Second => std::time::Duration::from_secs(1),
            RateLimitWindow::Minute => std::time::Duration::from_secs(60),
            RateLimitWindow::Hour => std::time::Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSetting {
    pub limit: u32,
    #[serde(alias = "unit")]
    pub window: RateLimitWindow,
}

/// The static configuration record for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub adapter: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_url: Option<String>,
    pub models: HashSet<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rate_limit: Option<RateLimitSetting>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(alias = "timeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(alias = "options", default)]
    pub extra_options: HashMap<String, serde_json::Value>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl ProviderDescriptor {
    /// Validates that name/adapter are present, models are non-empty text,
    /// the rate limit (if any) has a positive limit, and priority is
    /// non-negative.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("provider name must not be empty".to_string());
        }
        if self.adapter.trim().is_empty() {
            return Err(format!("provider {} has no adapter", self.name));
        }
        if self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(format!("provider {} has an empty model name", self.name));
        }
        if let Some(rl) = &self.rate_limit {
            if rl.limit == 0 {
                return Err(format!(
                    "provider {} rate_limit.limit must be positive",
                    self.name
                ));
            }
        }
        if self.priority < 0 {
            return Err(format!("provider {} priority must be >= 0", self.name));
        }
        Ok(())
    }
}

/// One provider's entry in the config file. The descriptor fields are
/// flattened so the file shape is a single flat JSON object per provider
/// (`{"api_key": ..., "models": [...], "env_var_name": ...}`)
/// rather than nesting the descriptor under its own key.
///
/// `env_var_name`/`base_url_env_var` name the environment variable to fall
/// back to; when absent a name is derived from the provider name
/// (`{PROVIDER}_API_KEY` upper-cased).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileProviderEntry {
    #[serde(flatten)]
    pub descriptor: ProviderDescriptor,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub env_var_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_url_env_var: Option<String>,
}

/// Runtime override for one provider, applied with top priority.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverride {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Pure merge function: runtime overrides > file descriptors > environment.
/// `gateway-service` supplies the file layer (parsed from JSON) and the
/// environment layer (read from `std::env`); neither is read here.
pub struct ConfigResolver;

impl ConfigResolver {
    /// Resolve descriptors for every provider named in `file_entries`,
    /// applying `runtime_overrides` and `environment` (a map standing in for
    /// `std::env::var` lookups, so tests don't touch the real environment).
    pub fn resolve(
        file_entries: &HashMap<String, FileProviderEntry>,
        runtime_overrides: &HashMap<String, RuntimeOverride>,
        environment: &HashMap<String, String>,
    ) -> HashMap<String, ProviderDescriptor> {
        let mut resolved = HashMap::with_capacity(file_entries.len());

        for (name, entry) in file_entries {
            let mut descriptor = entry.descriptor.clone();
            descriptor.name = name.clone();

            let env_key_name = entry
                .env_var_name
                .clone()
                .unwrap_or_else(|| format!("{}_API_KEY", name.to_uppercase()));
            let env_base_url_name = entry
                .base_url_env_var
                .clone()
                .unwrap_or_else(|| format!("{}_BASE_URL", name.to_uppercase()));

            let runtime = runtime_overrides.get(name);

            descriptor.api_key = runtime
                .and_then(|r| r.api_key.clone())
                .or_else(|| descriptor.api_key.clone())
                .or_else(|| environment.get(&env_key_name).cloned());

            descriptor.base_url = runtime
                .and_then(|r| r.base_url.clone())
                .or_else(|| descriptor.base_url.clone())
                .or_else(|| environment.get(&env_base_url_name).cloned());

            resolved.insert(name.clone(), descriptor);
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> FileProviderEntry {
        FileProviderEntry {
            descriptor: ProviderDescriptor {
                name: name.to_string(),
                adapter: name.to_string(),
                api_key: None,
                base_url: None,
                models: HashSet::from(["m1".to_string()]),
                priority: 0,
                rate_limit: None,
                max_retries: 3,
                timeout_ms: 30_000,
                headers: HashMap::new(),
                extra_options: HashMap::new(),
            },
            env_var_name: None,
            base_url_env_var: None,
        }
    }

    #[test]
    fn runtime_override_wins_over_file_and_env() {
        let mut file = HashMap::new();
        let mut file_entry = entry("openai");
        file_entry.descriptor.api_key = Some("file-key".to_string());
        file.insert("openai".to_string(), file_entry);

        let mut runtime = HashMap::new();
        runtime.insert(
            "openai".to_string(),
            RuntimeOverride {
                api_key: Some("runtime-key".to_string()),
                base_url: None,
            },
        );

        let mut env = HashMap::new();
        env.insert("OPENAI_API_KEY".to_string(), "env-key".to_string());

        let resolved = ConfigResolver::resolve(&file, &runtime, &env);
        assert_eq!(
            resolved["openai"].api_key.as_deref(),
            Some("runtime-key")
        );
    }

    #[test]
    fn falls_back_to_environment_when_file_and_runtime_absent() {
        let mut file = HashMap::new();
        file.insert("openai".to_string(), entry("openai"));

        let mut env = HashMap::new();
        env.insert("OPENAI_API_KEY".to_string(), "env-key".to_string());

        let resolved = ConfigResolver::resolve(&file, &HashMap::new(), &env);
        assert_eq!(resolved["openai"].api_key.as_deref(), Some("env-key"));
    }

    #[test]
    fn resolve_is_pure() {
        let mut file = HashMap::new();
        file.insert("openai".to_string(), entry("openai"));
        let runtime = HashMap::new();
        let env = HashMap::new();

        let a = ConfigResolver::resolve(&file, &runtime, &env);
        let b = ConfigResolver::resolve(&file, &runtime, &env);
        assert_eq!(a["openai"].api_key, b["openai"].api_key);
    }

    #[test]
    fn validate_rejects_zero_rate_limit() {
        let mut d = entry("openai").descriptor;
        d.rate_limit = Some(RateLimitSetting {
            limit: 0,
            window: RateLimitWindow::Minute,
        });
        assert!(d.validate().is_err());
    }
}
