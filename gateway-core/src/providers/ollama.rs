//! Ollama local inference server adapter.
//!
//! Ollama has no concept of an API key and serves one model per request
//! without the OpenAI `n`/`stop` knobs, so this adapter is intentionally
//! thinner than [`super::openai`]/[`super::anthropic`]; pricing for this
//! provider is zero in [`crate::pricing`] since it runs on the caller's own
//! hardware.

use crate::config::ProviderDescriptor;
use crate::error::GatewayError;
use crate::models::{Choice, Message, Request, Response, Role, Usage};
use crate::providers::http_client::HttpProviderClient;
use crate::providers::{ChunkEmitter, Feature, Provider};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    http: HttpProviderClient,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Default, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    model: String,
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

impl OllamaProvider {
    pub fn new(descriptor: &ProviderDescriptor) -> Result<Self, GatewayError> {
        let http = HttpProviderClient::new(
            "ollama",
            Duration::from_millis(descriptor.timeout_ms),
            descriptor
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            None,
            &descriptor.headers,
        )?;

        Ok(Self { http })
    }

    fn build_request(request: &Request, stream: bool) -> OllamaRequest {
        OllamaRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: role_str(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            stream,
            options: OllamaOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_tokens,
                top_p: request.options.top_p,
            },
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn execute(
        &self,
        request: &Request,
        _descriptor: &ProviderDescriptor,
    ) -> Result<Response, GatewayError> {
        let body = Self::build_request(request, false);
        let parsed: OllamaResponse = self.http.post_json("/api/chat", &body).await?;

        Ok(Response {
            id: request.id.clone(),
            model: parsed.model,
            provider: "ollama".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(parsed.message.content),
                finish_reason: Some(if parsed.done {
                    "stop".to_string()
                } else {
                    "length".to_string()
                }),
            }],
            usage: match (parsed.prompt_eval_count, parsed.eval_count) {
                (Some(p), Some(c)) => Some(Usage::new(p, c)),
                _ => None,
            },
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
        // Ollama streams newline-delimited JSON objects rather than SSE
        // `data:` frames; each line is one already-complete chunk, so no
        // `SseParser` buffering is needed here.
        let body = Self::build_request(request, true);
        let response = self.http.post_json_stream("/api/chat", &body).await?;

        let mut buffer = String::new();
        let mut bytes_stream = response.bytes_stream();
        while let Some(bytes) = bytes_stream.next().await {
            let bytes = bytes.map_err(|e| GatewayError::NetworkError {
                provider: "ollama".to_string(),
                message: e.to_string(),
            })?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].to_string();
                buffer.drain(..=pos);
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<OllamaResponse>(&line) {
                    Ok(parsed) => emit(crate::models::Chunk {
                        content: Some(parsed.message.content),
                        finish_reason: if parsed.done {
                            Some("stop".to_string())
                        } else {
                            None
                        },
                        usage: match (parsed.prompt_eval_count, parsed.eval_count) {
                            (Some(p), Some(c)) => Some(Usage::new(p, c)),
                            _ => None,
                        },
                        ..Default::default()
                    }),
                    Err(e) => tracing::warn!(error = %e, "skipping undecodable ollama chunk"),
                }
            }
        }
        Ok(())
    }

    async fn health_check(&self, _descriptor: &ProviderDescriptor) -> Result<(), GatewayError> {
        self.http
            .get_json::<serde_json::Value>("/api/tags")
            .await
            .map(|_| ())
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::Streaming | Feature::SystemMessages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            name: "ollama".to_string(),
            adapter: "ollama".to_string(),
            api_key: None,
            base_url: None,
            models: HashSet::from(["llama3".to_string()]),
            priority: 0,
            rate_limit: None,
            max_retries: 3,
            timeout_ms: 1_000,
            headers: HashMap::new(),
            extra_options: HashMap::new(),
        }
    }

    #[test]
    fn no_authorization_header_is_set() {
        // Constructing must not fail even with no api_key configured;
        // Ollama has no auth concept.
        assert!(OllamaProvider::new(&descriptor()).is_ok());
    }

    #[test]
    fn request_maps_max_tokens_to_num_predict() {
        let request = Request::new(
            "r1".to_string(),
            "ollama".to_string(),
            crate::models::CompletionParams {
                provider: Some("ollama".to_string()),
                model: "llama3".to_string(),
                messages: vec![Message::user("hi")],
                options: crate::models::CompletionOptions {
                    max_tokens: Some(128),
                    ..Default::default()
                },
            },
            false,
        );
        let body = OllamaProvider::build_request(&request, false);
        assert_eq!(body.options.num_predict, Some(128));
    }

    fn chat_request() -> Request {
        Request::new(
            "r1".to_string(),
            "ollama".to_string(),
            crate::models::CompletionParams {
                provider: Some("ollama".to_string()),
                model: "llama3".to_string(),
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
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "pong"},
                "done": true,
                "prompt_eval_count": 4,
                "eval_count": 2
            })))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = OllamaProvider::new(&d).unwrap();

        let response = provider.execute(&chat_request(), &d).await.unwrap();
        assert_eq!(response.content(), "pong");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 6);
    }

    #[tokio::test]
    async fn health_check_hits_the_tags_endpoint() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/tags"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": []
            })))
            .mount(&server)
            .await;

        let mut d = descriptor();
        d.base_url = Some(server.uri());
        let provider = OllamaProvider::new(&d).unwrap();

        assert!(provider.health_check(&d).await.is_ok());
    }
}
