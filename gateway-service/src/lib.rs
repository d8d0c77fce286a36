//! # gateway-service
//!
//! A thin binary+library crate that loads a [`config::Config`], builds a
//! `gateway_core::DispatchEngine`, and exposes its public API surface over
//! HTTP with `axum` (SPEC_FULL.md §12). All routing, retry, rate-limiting,
//! and fallback policy lives in `gateway-core`; this crate only does
//! configuration loading, an optional static API-key gate, and HTTP
//! translation.
//!
//! ## Module map
//!
//! - [`config`]: the JSON config file (spec.md §6) plus server/logging/auth
//!   settings.
//! - [`gateway_error`]: maps `gateway_core::GatewayError` to HTTP responses.
//! - [`auth`]: the optional static API-key middleware.
//! - [`handlers`]: one handler per route in SPEC_FULL.md §12.
//! - [`server`]: engine bootstrap (provider registration, connection,
//!   background tasks) and router assembly.

pub mod auth;
pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod server;

pub use server::create_server;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use gateway_core::config::{FileProviderEntry, ProviderDescriptor};
    use std::collections::{HashMap, HashSet};

    fn mock_provider_entry(name: &str, models: &[&str]) -> FileProviderEntry {
        FileProviderEntry {
            descriptor: ProviderDescriptor {
                name: name.to_string(),
                adapter: "mock".to_string(),
                api_key: None,
                base_url: None,
                models: models.iter().map(|m| m.to_string()).collect::<HashSet<_>>(),
                priority: 0,
                rate_limit: None,
                max_retries: 3,
                timeout_ms: 1_000,
                headers: HashMap::new(),
                extra_options: HashMap::new(),
            },
            env_var_name: None,
            base_url_env_var: None,
        }
    }

    fn config_with_mock_provider() -> Config {
        let mut config = Config::default();
        config
            .providers
            .insert("mock".to_string(), mock_provider_entry("mock", &["m"]));
        config
    }

    #[tokio::test]
    async fn health_check_returns_ok_with_no_providers() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_completions_round_trips_through_mock_adapter() {
        let app = create_server(config_with_mock_provider()).await.unwrap();
        let server = TestServer::new(app).unwrap();

        let response = server
            .post("/v1/chat/completions")
            .json(&serde_json::json!({
                "model": "m",
                "messages": [{"role": "user", "content": "ping"}]
            }))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["choices"][0]["message"]["content"], "echo: ping");
    }

    #[tokio::test]
    async fn list_providers_reports_the_configured_provider() {
        let app = create_server(config_with_mock_provider()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/admin/providers").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert!(body["providers"]["mock"].is_object());
    }

    #[tokio::test]
    async fn auth_gate_rejects_missing_bearer_token_when_configured() {
        let mut config = config_with_mock_provider();
        config.auth.api_key = Some("secret".to_string());
        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();

        let response = server.get("/v1/models").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server
            .get("/v1/models")
            .add_header(
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderValue::from_static("Bearer secret"),
            )
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn costs_csv_has_the_expected_header() {
        let app = create_server(config_with_mock_provider()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/costs.csv").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response
            .text()
            .starts_with("Timestamp,Provider,Model,Prompt Tokens,Completion Tokens,Total Tokens,Cost"));
    }
}
