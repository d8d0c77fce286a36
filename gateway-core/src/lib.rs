//! # gateway-core
//!
//! The coordinated request-dispatch subsystem for a multi-provider LLM
//! gateway: provider registry and config resolution, per-provider rate
//! limiting and circuit breaking, an explicit connection lifecycle, SSE
//! stream parsing, cost/health telemetry, and the dispatch engine that ties
//! them together into `completion` / `completion_async` / `completion_stream`.
//!
//! ## Module map
//!
//! - [`models`]: the wire-level `Request`/`Response`/`Chunk` types every
//!   other module shares.
//! - [`error`]: the error kind taxonomy and recoverability/retry policy.
//! - [`config`]: provider descriptors and the file/env/runtime config
//!   resolver.
//! - [`registry`]: provider name → descriptor map and the model → provider
//!   index.
//! - [`rate_limiter`]: per-provider token bucket.
//! - [`circuit_breaker`]: per-provider three-state breaker.
//! - [`connection`]: per-provider connection lifecycle and health-check
//!   scheduling.
//! - [`trackers`]: health and cost telemetry logs.
//! - [`pricing`]: static per-provider/model pricing table.
//! - [`stream`]: SSE line parsing into provider-agnostic chunks.
//! - [`providers`]: the adapter trait and the concrete vendor adapters.
//! - [`user_prefs`]: the user-preference store the engine consults for
//!   provider/model overrides.
//! - [`dispatch`]: the engine that owns the pending queue and active-request
//!   map and drives validation, resolution, fallback, and retry.
//!
//! Adapters are pure strategies; the [`dispatch::DispatchEngine`] is the only
//! component that owns mutable cross-request state.

pub mod circuit_breaker;
pub mod common;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod rate_limiter;
pub mod registry;
pub mod stream;
pub mod trackers;
pub mod user_prefs;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{ConfigResolver, ProviderDescriptor, RateLimitSetting, RateLimitWindow};
pub use connection::{ConnectionManager, ConnectionRecord, ConnectionState};
pub use dispatch::{DispatchEngine, DispatchEngineConfig, ModelInfo, RequestOutcome};
pub use error::{ErrorKind, GatewayError, Severity};
pub use models::{
    accumulate, Accumulated, Choice, Chunk, CompletionOptions, CompletionParams, Message,
    Priority, Request, RequestStatus, Response, Role, Usage,
};
pub use providers::{create_provider, Feature, Provider};
pub use rate_limiter::TokenBucket;
pub use registry::ProviderRegistry;
pub use stream::SseParser;
pub use trackers::{
    CostFilter, CostRecord, CostSummary, CostTracker, HealthRecord, HealthStatus, HealthTracker,
    ProviderHealthSummary,
};
pub use user_prefs::{InMemoryUserPreferences, UserPreferences};

/// Result type for gateway-core operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
