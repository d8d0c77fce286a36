//! Small `reqwest` wrapper shared by the HTTP-backed adapters
//! ([`super::openai`], [`super::anthropic`]). Not part of the Provider
//! contract itself — just the plumbing every JSON-over-HTTP vendor needs.

use crate::error::{ErrorKind, GatewayError};
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
    provider: String,
}

impl HttpProviderClient {
    pub fn new(
        provider: impl Into<String>,
        timeout: Duration,
        base_url: impl Into<String>,
        api_key: Option<&str>,
        headers: &HashMap<String, String>,
    ) -> Result<Self, GatewayError> {
        let provider = provider.into();
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            GatewayError::ProviderNotConfigured {
                provider: format!("{provider}: failed to build http client ({e})"),
            }
        })?;

        let mut default_headers = HeaderMap::new();
        if let Some(key) = api_key {
            if let Ok(value) = format!("Bearer {key}").parse() {
                default_headers.insert("Authorization", value);
            }
        }
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (k.parse::<reqwest::header::HeaderName>(), v.parse()) {
                default_headers.insert(name, value);
            }
        }

        Ok(Self {
            http,
            base_url: base_url.into(),
            default_headers,
            provider,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    pub async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let resp = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(self.default_headers.clone())
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(self.classify(resp).await);
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| GatewayError::InvalidResponse {
                provider: self.provider.clone(),
                message: e.to_string(),
            })
    }

    /// Issue the request and return the raw streaming body for the caller
    /// to feed to [`crate::stream::SseParser`].
    pub async fn post_json_stream<Req: Serialize>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Response, GatewayError> {
        let resp = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(self.default_headers.clone())
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(self.classify(resp).await);
        }
        Ok(resp)
    }

    pub async fn get_json<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, GatewayError> {
        let resp = self
            .http
            .request(Method::GET, self.build_url(path))
            .headers(self.default_headers.clone())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(self.classify(resp).await);
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| GatewayError::InvalidResponse {
                provider: self.provider.clone(),
                message: e.to_string(),
            })
    }

    async fn classify(&self, resp: Response) -> GatewayError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").cloned())
            .and_then(|e| e.get("message").cloned())
            .and_then(|m| m.as_str().map(str::to_string))
            .unwrap_or(body);

        match ErrorKind::from_http_status(status) {
            ErrorKind::AuthenticationFailed => GatewayError::AuthenticationFailed {
                provider: self.provider.clone(),
                reason: message,
            },
            ErrorKind::RateLimitExceeded => GatewayError::RateLimitExceeded {
                provider: self.provider.clone(),
            },
            ErrorKind::ServiceUnavailable => GatewayError::ServiceUnavailable {
                provider: self.provider.clone(),
                message,
            },
            _ => GatewayError::NetworkError {
                provider: self.provider.clone(),
                message: format!("http {status}: {message}"),
            },
        }
    }
}
