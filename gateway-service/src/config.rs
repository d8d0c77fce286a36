//! # Service Configuration
//!
//! Loads the JSON config file spec.md §6 describes (default path
//! `~/.rubber_duck/config.json`, overridable via `--config` or
//! `GATEWAY_CONFIG_PATH`), plus server/logging/auth settings that sit above
//! `gateway-core`'s provider descriptors. Uses the `config` crate the same
//! way the teacher's `Config::load` does: a layered `File` + `Environment`
//! source, merged into one typed struct.
//!
//! `gateway-core::config::ConfigResolver` does the provider-level
//! runtime/file/environment merge; this module is only responsible for
//! locating the file and handing its `providers` map to that resolver.

use gateway_core::config::FileProviderEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Minimal optional gate (SPEC_FULL.md §14: not a full auth subsystem). When
/// `api_key` is set, every request must carry it as `Authorization: Bearer
/// <key>`; when unset, the gateway is unauthenticated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub providers: HashMap<String, FileProviderEntry>,
}

impl Config {
    /// `~/.rubber_duck/config.json`, falling back to `.` if `HOME` isn't set
    /// (spec.md §6).
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".rubber_duck").join("config.json")
    }

    /// Load from `path`, layering environment overrides for `server.*` via
    /// the `GATEWAY` prefix (`GATEWAY_SERVER__HOST`, `GATEWAY_SERVER__PORT`,
    /// ...), matching the teacher's `config::Environment` layering. A
    /// missing file is not an error: an empty `providers` map with default
    /// settings is a valid (if useless) configuration for local
    /// smoke-testing.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            );

        let loaded = builder.build()?;
        let config: Config = loaded.try_deserialize().unwrap_or_default();
        Ok(config)
    }

    /// Validate per spec.md §4.2: every provider descriptor validates, and
    /// the server settings are sane. Provider-level `api_key`/`base_url`
    /// resolution (file/env/runtime merge) happens later, in
    /// [`gateway_core::config::ConfigResolver::resolve`], so an absent
    /// `api_key` here is not itself a validation failure.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be nonzero");
        }
        for (name, entry) in &self.providers {
            let mut descriptor = entry.descriptor.clone();
            descriptor.name = name.clone();
            descriptor
                .validate()
                .map_err(|e| anyhow::anyhow!("provider {name}: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_with_no_file() {
        let config = Config::load("/nonexistent/path/config.json").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert!(config.providers.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_port_zero() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
