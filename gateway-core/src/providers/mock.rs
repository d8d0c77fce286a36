//! In-memory test adapter.
//!
//! Echoes the last user message back as an assistant reply with a fixed
//! token count, or can be scripted to fail — this is the "fake" adapter
//! spec.md §8 scenario 1 describes and the fixture used throughout the
//! dispatch engine's own test suite.

use crate::config::ProviderDescriptor;
use crate::error::GatewayError;
use crate::models::{Choice, Message, Request, Response, Usage};
use crate::providers::{ChunkEmitter, Feature, Provider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A scripted outcome for one call to [`MockProvider::execute`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Succeed,
    Fail(MockFailure),
}

#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    ServiceUnavailable,
    Timeout,
    RateLimitExceeded,
    ContextTooLarge,
    AuthenticationFailed,
}

impl MockFailure {
    fn into_error(self, provider: &str) -> GatewayError {
        match self {
            MockFailure::ServiceUnavailable => GatewayError::ServiceUnavailable {
                provider: provider.to_string(),
                message: "scripted failure".to_string(),
            },
            MockFailure::Timeout => GatewayError::Timeout {
                provider: provider.to_string(),
            },
            MockFailure::RateLimitExceeded => GatewayError::RateLimitExceeded {
                provider: provider.to_string(),
            },
            MockFailure::ContextTooLarge => GatewayError::ContextTooLarge {
                provider: provider.to_string(),
            },
            MockFailure::AuthenticationFailed => GatewayError::AuthenticationFailed {
                provider: provider.to_string(),
                reason: "scripted failure".to_string(),
            },
        }
    }
}

/// A provider adapter with a scripted outcome sequence, so tests can
/// exercise circuit-breaker trips, retries, and fallback without a network.
pub struct MockProvider {
    name: String,
    script: Mutex<Vec<Scripted>>,
    cursor: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Build a provider that always succeeds (the default construction
    /// behavior, kept explicit for readability at call sites).
    pub fn always_succeeds(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// Replace the outcome script; the provider cycles through it,
    /// repeating the final entry once exhausted.
    pub fn with_script(self, script: Vec<Scripted>) -> Self {
        *self.script.lock().unwrap() = script;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Scripted {
        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return Scripted::Succeed;
        }
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        script[i.min(script.len() - 1)].clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        request: &Request,
        _descriptor: &ProviderDescriptor,
    ) -> Result<Response, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_outcome() {
            Scripted::Succeed => {
                let reply = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, crate::models::Role::User))
                    .map(|m| format!("echo: {}", m.content))
                    .unwrap_or_else(|| "pong".to_string());

                Ok(Response {
                    id: request.id.clone(),
                    model: request.model.clone(),
                    provider: self.name.clone(),
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant(reply),
                        finish_reason: Some("stop".to_string()),
                    }],
                    usage: Some(Usage::new(1, 1)),
                    created_at: chrono::Utc::now(),
                    metadata: Default::default(),
                    cached: false,
                })
            }
            Scripted::Fail(failure) => Err(failure.into_error(&self.name)),
        }
    }

    async fn stream(
        &self,
        request: &Request,
        descriptor: &ProviderDescriptor,
        emit: ChunkEmitter<'_>,
    ) -> Result<(), GatewayError> {
        let response = self.execute(request, descriptor).await?;
        let content = response.content().to_string();
        emit(crate::models::Chunk {
            role: Some(crate::models::Role::Assistant),
            ..Default::default()
        });
        emit(crate::models::Chunk {
            content: Some(content),
            finish_reason: Some("stop".to_string()),
            usage: response.usage,
            ..Default::default()
        });
        Ok(())
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::Streaming | Feature::SystemMessages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompletionParams;
    use std::collections::HashMap;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            name: "mock".to_string(),
            adapter: "mock".to_string(),
            api_key: None,
            base_url: None,
            models: Default::default(),
            priority: 0,
            rate_limit: None,
            max_retries: 3,
            timeout_ms: 1_000,
            headers: HashMap::new(),
            extra_options: HashMap::new(),
        }
    }

    fn request() -> Request {
        Request::new(
            "r1".to_string(),
            "mock".to_string(),
            CompletionParams {
                provider: Some("mock".to_string()),
                model: "m".to_string(),
                messages: vec![Message::user("ping")],
                options: Default::default(),
            },
            false,
        )
    }

    #[tokio::test]
    async fn scenario_1_echo_reply() {
        let provider = MockProvider::new("mock");
        let response = provider.execute(&request(), &descriptor()).await.unwrap();
        assert_eq!(response.content(), "echo: ping");
        assert_eq!(response.usage.unwrap().total_tokens, 2);
    }

    #[tokio::test]
    async fn scripted_failures_cycle_then_hold_last() {
        let provider = MockProvider::new("mock").with_script(vec![
            Scripted::Fail(MockFailure::ServiceUnavailable),
            Scripted::Succeed,
        ]);
        assert!(provider.execute(&request(), &descriptor()).await.is_err());
        assert!(provider.execute(&request(), &descriptor()).await.is_ok());
        assert!(provider.execute(&request(), &descriptor()).await.is_ok());
    }
}
