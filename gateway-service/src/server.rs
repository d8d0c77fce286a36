//! # HTTP Server
//!
//! Builds the `gateway-core` engine from [`crate::config::Config`] and wraps
//! it in an `axum::Router` (SPEC_FULL.md §12), in the teacher's
//! `create_server(config) -> anyhow::Result<Router>` shape — trimmed to the
//! provider-bootstrap/middleware stack this gateway actually needs (no
//! plugin manager, cache manager, or WebSocket manager).

use crate::auth::auth_middleware;
use crate::config::Config;
use crate::handlers;
use axum::routing::{get, post};
use axum::Router;
use gateway_core::providers::create_provider;
use gateway_core::{
    ConfigResolver, ConnectionManager, DispatchEngine, DispatchEngineConfig,
    InMemoryUserPreferences, ProviderRegistry, UserPreferences,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler. Cheap to clone: every field is
/// already an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<DispatchEngine>,
}

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Build the engine, register and connect every configured provider, spawn
/// the queue processor and health-check task, and assemble the router.
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let environment: HashMap<String, String> = std::env::vars().collect();
    let resolved = ConfigResolver::resolve(&config.providers, &HashMap::new(), &environment);

    let registry = Arc::new(ProviderRegistry::new());
    let connection = Arc::new(ConnectionManager::new(HEALTH_CHECK_INTERVAL));
    let user_prefs: Arc<dyn UserPreferences> = Arc::new(InMemoryUserPreferences::new());

    let engine = DispatchEngine::new(
        registry.clone(),
        connection.clone(),
        user_prefs,
        DispatchEngineConfig::default(),
    );

    for (name, descriptor) in resolved {
        let adapter = create_provider(&descriptor)?;
        engine
            .register_provider(adapter, descriptor)
            .map_err(|e| anyhow::anyhow!("registering provider {name}: {e}"))?;
    }

    engine.connect_all().await;
    engine.spawn_queue_processor();

    let health_registry = registry.clone();
    gateway_core::connection::spawn_health_check_task(
        connection.clone(),
        registry.provider_names(),
        move |name| {
            let registry = health_registry.clone();
            async move {
                let adapter = registry.get(&name).ok_or_else(|| {
                    gateway_core::GatewayError::ProviderNotConfigured {
                        provider: name.clone(),
                    }
                })?;
                let descriptor = registry.descriptor(&name).ok_or_else(|| {
                    gateway_core::GatewayError::ProviderNotConfigured {
                        provider: name.clone(),
                    }
                })?;
                adapter.health_check(&descriptor).await
            }
        },
    );

    if config.auth.api_key.is_none() {
        tracing::warn!(
            "no auth.api_key configured; this gateway is reachable without authentication"
        );
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        engine,
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route(
            "/v1/chat/completions/async",
            post(handlers::chat_completions_async),
        )
        .route(
            "/v1/chat/completions/{request_id}",
            get(handlers::get_completion_result),
        )
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .route("/costs", get(handlers::cost_summary))
        .route("/costs.csv", get(handlers::cost_csv))
        .route(
            "/admin/providers/{name}/config",
            post(handlers::update_provider_config).get(handlers::get_provider_config),
        )
        .route("/admin/reload", post(handlers::reload_config))
        .route(
            "/admin/providers/{name}/connect",
            post(handlers::connect_provider),
        )
        .route(
            "/admin/providers/{name}/disconnect",
            post(handlers::disconnect_provider),
        )
        .route(
            "/admin/providers/{name}/enabled",
            post(handlers::set_provider_enabled),
        )
        .route("/admin/providers", get(handlers::list_providers))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_millis(
                    state.config.server.request_timeout_ms,
                ))),
        )
        .with_state(state);

    Ok(app)
}
