//! Anthropic Messages API adapter.

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: HttpProviderClient,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(descriptor: &ProviderDescriptor) -> Result<Self, GatewayError> {
        let mut headers = descriptor.headers.clone();
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());

        let http = HttpProviderClient::new(
            "anthropic",
            Duration::from_millis(descriptor.timeout_ms),
            descriptor
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            descriptor.api_key.as_deref(),
            &headers,
        )?;

        Ok(Self { http })
    }

    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = String::new();
        let mut out = Vec::with_capacity(messages.len());

        for message in messages {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.content);
                }
                Role::User => out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: message.content.clone(),
                }),
                Role::Assistant => out.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: message.content.clone(),
                }),
            }
        }

        (if system.is_empty() { None } else { Some(system) }, out)
    }

    fn build_request(request: &Request, stream: bool) -> AnthropicRequest {
        let (system, messages) = Self::convert_messages(&request.messages);
        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.options.max_tokens.unwrap_or(4096),
            messages,
            system,
            temperature: Some(request.options.temperature),
            stream,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn execute(
        &self,
        request: &Request,
        _descriptor: &ProviderDescriptor,
    ) -> Result<Response, GatewayError> {
        let body = Self::build_request(request, false);
        let parsed: AnthropicResponse = self.http.post_json("/v1/messages", &body).await?;

        let content = parsed.content.into_iter().map(|c| c.text).collect::<String>();

        Ok(Response {
            id: parsed.id,
            model: parsed.model,
            provider: "anthropic".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: Some(parsed.stop_reason.unwrap_or_else(|| "stop".to_string())),
            }],
            usage: Some(Usage::new(parsed.usage.input_tokens, parsed.usage.output_tokens)),
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
        let response = self.http.post_json_stream("/v1/messages", &body).await?;

        let mut parser = SseParser::new();
        let mut bytes_stream = response.bytes_stream();
        while let Some(bytes) = bytes_stream.next().await {
            let bytes = bytes.map_err(|e| GatewayError::NetworkError {
                provider: "anthropic".to_string(),
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
            "anthropic".to_string(),
            crate::models::CompletionParams {
                provider: Some("anthropic".to_string()),
                model: descriptor
                    .models
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "claude-3-haiku".to_string()),
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
            Feature::Streaming | Feature::SystemMessages | Feature::Vision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            name: "anthropic".to_string(),
            adapter: "anthropic".to_string(),
            api_key: Some("sk-ant-test".to_string()),
            base_url: Some("http://127.0.0.1:0".to_string()),
            models: HashSet::from(["claude-3-opus".to_string()]),
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
            "anthropic".to_string(),
            crate::models::CompletionParams {
                provider: Some("anthropic".to_string()),
                model: "claude-3-opus".to_string(),
                messages: vec![Message::system("be terse"), Message::user("ping")],
                options: crate::models::CompletionOptions::default(),
            },
            false,
        )
    }

    #[test]
    fn system_messages_are_pulled_out_of_the_message_list() {
        let (system, messages) = AnthropicProvider::convert_messages(&request().messages);
        assert_eq!(system, Some("be terse".to_string()));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn supports_streaming_but_not_function_calling() {
        let provider = AnthropicProvider::new(&descriptor()).unwrap();
        assert!(provider.supports(Feature::Streaming));
        assert!(!provider.supports(Feature::FunctionCalling));
    }

    #[tokio::test]
    async fn execute_parses_a_wire_level_response() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/messages"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "model": "claude-3-opus",
                "content": [{"type": "text", "text": "pong"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 3, "output_tokens": 2}
            })))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = AnthropicProvider::new(&d).unwrap();

        let response = provider.execute(&request(), &d).await.unwrap();
        assert_eq!(response.content(), "pong");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn execute_maps_503_to_service_unavailable() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/messages"))
            .respond_with(wiremock::ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": {"message": "overloaded"}
            })))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = AnthropicProvider::new(&d).unwrap();

        let err = provider.execute(&request(), &d).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable { .. }));
    }
}
