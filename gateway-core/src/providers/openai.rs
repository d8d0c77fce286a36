//! OpenAI-compatible chat-completions adapter.
//!
//! Also serves any vendor that mirrors the OpenAI wire shape (many
//! self-hosted gateways and some other vendors do) — `descriptor.base_url`
//! just needs to point elsewhere.

use crate::config::ProviderDescriptor;
use crate::error::GatewayError;
use crate::models::{Choice, Message, Request, Response, Role, Usage};
use crate::providers::http_client::HttpProviderClient;
use crate::providers::{ChunkEmitter, Feature, Provider};
use crate::stream::SseParser;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    http: HttpProviderClient,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    n: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    id: String,
    model: String,
    choices: Vec<OpenAiResponseChoice>,
    #[serde(default)]
    usage: Option<OpenAiResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseChoice {
    index: u32,
    message: OpenAiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

impl OpenAiProvider {
    pub fn new(descriptor: &ProviderDescriptor) -> Result<Self, GatewayError> {
        let http = HttpProviderClient::new(
            "openai",
            Duration::from_millis(descriptor.timeout_ms),
            descriptor
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            descriptor.api_key.as_deref(),
            &descriptor.headers,
        )?;

        Ok(Self { http })
    }

    fn build_request(request: &Request, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: role_str(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            top_p: request.options.top_p,
            frequency_penalty: request.options.frequency_penalty,
            presence_penalty: request.options.presence_penalty,
            stop: request.options.stop.clone(),
            n: request.options.n,
            stream,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn execute(
        &self,
        request: &Request,
        _descriptor: &ProviderDescriptor,
    ) -> Result<Response, GatewayError> {
        let body = Self::build_request(request, false);
        let parsed: OpenAiResponse = self.http.post_json("/v1/chat/completions", &body).await?;

        let choices = parsed
            .choices
            .into_iter()
            .map(|c| Choice {
                index: c.index,
                message: Message::assistant(c.message.content),
                finish_reason: Some(c.finish_reason.unwrap_or_else(|| "stop".to_string())),
            })
            .collect::<Vec<_>>();

        if choices.is_empty() {
            return Err(GatewayError::InvalidResponse {
                provider: "openai".to_string(),
                message: "response had no choices".to_string(),
            });
        }

        Ok(Response {
            id: parsed.id,
            model: parsed.model,
            provider: "openai".to_string(),
            choices,
            usage: parsed
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
            created_at: chrono::Utc::now(),
            metadata: Default::default(),
            cached: false,
        })
    }

    async fn stream(
        &self,
        request: &Request,
        _descriptor: &ProviderDescriptor,
        emit: ChunkEmitter<'_>,
    ) -> Result<(), GatewayError> {
        let body = Self::build_request(request, true);
        let response = self
            .http
            .post_json_stream("/v1/chat/completions", &body)
            .await?;

        let mut parser = SseParser::new();
        let mut bytes_stream = response.bytes_stream();
        while let Some(bytes) = bytes_stream.next().await {
            let bytes = bytes.map_err(|e| GatewayError::NetworkError {
                provider: "openai".to_string(),
                message: e.to_string(),
            })?;
            for chunk in parser.feed(&bytes) {
                emit(chunk);
            }
        }
        for chunk in parser.finish() {
            emit(chunk);
        }
        Ok(())
    }

    async fn health_check(&self, descriptor: &ProviderDescriptor) -> Result<(), GatewayError> {
        let probe = Request::new(
            "health-check".to_string(),
            "openai".to_string(),
            crate::models::CompletionParams {
                provider: Some("openai".to_string()),
                model: descriptor
                    .models
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
                messages: vec![Message::user("ping")],
                options: crate::models::CompletionOptions {
                    max_tokens: Some(1),
                    ..Default::default()
                },
            },
            false,
        );
        self.execute(&probe, descriptor).await.map(|_| ())
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(
            feature,
            Feature::Streaming
                | Feature::FunctionCalling
                | Feature::SystemMessages
                | Feature::Vision
                | Feature::JsonMode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::{HashMap, HashSet};

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            name: "openai".to_string(),
            adapter: "openai".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://127.0.0.1:0".to_string()),
            models: HashSet::from(["gpt-4".to_string()]),
            priority: 0,
            rate_limit: None,
            max_retries: 3,
            timeout_ms: 1_000,
            headers: HashMap::new(),
            extra_options: HashMap::new(),
        }
    }

    #[test]
    fn request_carries_n_and_stream_flag() {
        let descriptor = descriptor();
        let request = Request::new(
            "r1".to_string(),
            "openai".to_string(),
            crate::models::CompletionParams {
                provider: Some("openai".to_string()),
                model: "gpt-4".to_string(),
                messages: vec![Message::user("hi")],
                options: crate::models::CompletionOptions::default(),
            },
            false,
        );
        let body = OpenAiProvider::build_request(&request, true);
        assert_eq!(body.n, 1);
        assert!(body.stream);
        let _ = descriptor;
    }

    #[test]
    fn supports_streaming_and_function_calling() {
        let provider = OpenAiProvider::new(&descriptor()).unwrap();
        assert!(provider.supports(Feature::Streaming));
        assert!(provider.supports(Feature::FunctionCalling));
        assert!(provider.supports(Feature::Vision));
    }

    fn request() -> Request {
        Request::new(
            "r1".to_string(),
            "openai".to_string(),
            crate::models::CompletionParams {
                provider: Some("openai".to_string()),
                model: "gpt-4".to_string(),
                messages: vec![Message::user("ping")],
                options: crate::models::CompletionOptions::default(),
            },
            false,
        )
    }

    #[tokio::test]
    async fn execute_parses_a_wire_level_response() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "model": "gpt-4",
                "choices": [{"index": 0, "message": {"content": "pong"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1}
            })))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = OpenAiProvider::new(&d).unwrap();

        let response = provider.execute(&request(), &d).await.unwrap();
        assert_eq!(response.content(), "pong");
        assert_eq!(response.usage.unwrap().total_tokens, 2);
    }

    #[tokio::test]
    async fn execute_maps_401_to_authentication_failed() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "invalid api key"}
            })))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = OpenAiProvider::new(&d).unwrap();

        let err = provider.execute(&request(), &d).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn execute_maps_429_to_rate_limit_exceeded() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = OpenAiProvider::new(&d).unwrap();

        let err = provider.execute(&request(), &d).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn execute_maps_transport_timeout_to_timeout_kind() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/chat/completions"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        d.timeout_ms = 20;
        let provider = OpenAiProvider::new(&d).unwrap();

        let err = provider.execute(&request(), &d).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
