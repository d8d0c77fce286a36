//! # Provider Adapter (C1)
//!
//! The interface every vendor implementation satisfies. Per spec.md §1,
//! only the *interface* is specified here — the per-vendor HTTP encoding is
//! deliberately minimal in the shipped adapters, enough to make the crate
//! buildable and testable end-to-end rather than a full vendor SDK.

use crate::config::ProviderDescriptor;
use crate::error::GatewayError;
use crate::models::{Chunk, Request, Response};
use async_trait::async_trait;

pub mod anthropic;
pub mod http_client;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Capability a caller or the dispatch engine may probe for via
/// [`Provider::supports`] (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Streaming,
    FunctionCalling,
    SystemMessages,
    Vision,
    JsonMode,
}

/// Callback invoked once per streamed chunk. Adapters must not invoke it
/// after the terminal chunk (spec.md §4.1, §9).
pub type ChunkEmitter<'a> = &'a mut (dyn FnMut(Chunk) + Send);

/// The provider capability set (spec.md §4.1, §9's "polymorphic adapters"
/// translation: a capability set with optional members, concrete adapters
/// registered by name in [`crate::registry::ProviderRegistry`]).
///
/// `connect`, `disconnect`, and `health_check` default to no-ops/ok so
/// stateless adapters don't need to implement them.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Blocking call until the vendor responds or the descriptor's timeout
    /// elapses (enforced by the dispatch engine, not the adapter itself).
    async fn execute(
        &self,
        request: &Request,
        descriptor: &ProviderDescriptor,
    ) -> Result<Response, GatewayError>;

    /// Stream a completion, invoking `emit` once per chunk. Must emit
    /// exactly one terminal chunk (non-null `finish_reason`).
    async fn stream(
        &self,
        request: &Request,
        descriptor: &ProviderDescriptor,
        emit: ChunkEmitter<'_>,
    ) -> Result<(), GatewayError>;

    /// Optional: establish a connection, returning an opaque payload.
    /// Absent (default) means the adapter is stateless.
    async fn connect(&self, _descriptor: &ProviderDescriptor) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Optional: idempotent teardown of whatever `connect` established.
    async fn disconnect(&self, _descriptor: &ProviderDescriptor) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Optional: defaults to ok for adapters with no cheap health probe.
    async fn health_check(&self, _descriptor: &ProviderDescriptor) -> Result<(), GatewayError> {
        Ok(())
    }

    fn supports(&self, feature: Feature) -> bool;
}

/// Build the adapter named by `descriptor.adapter` (spec.md §4.1, "Adapters
/// are constructed through a factory", generalizing the teacher's
/// `create_provider`).
pub fn create_provider(
    descriptor: &ProviderDescriptor,
) -> Result<std::sync::Arc<dyn Provider>, GatewayError> {
    use std::sync::Arc;

    match descriptor.adapter.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(descriptor)?)),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicProvider::new(descriptor)?)),
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(descriptor)?)),
        "mock" => Ok(Arc::new(mock::MockProvider::new(&descriptor.name))),
        other => Err(GatewayError::ProviderNotConfigured {
            provider: format!("unsupported adapter kind: {other}"),
        }),
    }
}
