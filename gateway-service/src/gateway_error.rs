//! # Service Error
//!
//! Wraps [`gateway_core::GatewayError`] for the HTTP boundary: maps each
//! [`gateway_core::ErrorKind`] to a status code and renders the
//! `{"error": {"message", "type", "code"}}` JSON body, in the same shape and
//! `IntoResponse` pattern the teacher's `GatewayError` uses — but driven off
//! one taxonomy instead of the teacher's `ClientError`/`ProviderError` split,
//! since `gateway-core` already collapsed that distinction (see its
//! `error.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::{ErrorKind, GatewayError as CoreError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ServiceError::Core(err) => match err.kind() {
                ErrorKind::InvalidRequest => (StatusCode::BAD_REQUEST, "invalid_request"),
                ErrorKind::UnknownModel => (StatusCode::NOT_FOUND, "unknown_model"),
                ErrorKind::ProviderNotConfigured => {
                    (StatusCode::NOT_FOUND, "provider_not_configured")
                }
                ErrorKind::ProviderNotConnected => {
                    (StatusCode::SERVICE_UNAVAILABLE, "provider_not_connected")
                }
                ErrorKind::ModelNotAvailable => (StatusCode::NOT_FOUND, "model_not_available"),
                ErrorKind::AllProvidersUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "all_providers_unavailable")
                }
                ErrorKind::AuthenticationFailed => {
                    (StatusCode::UNAUTHORIZED, "authentication_error")
                }
                ErrorKind::RateLimitExceeded => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error")
                }
                ErrorKind::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                ErrorKind::NetworkError => (StatusCode::BAD_GATEWAY, "network_error"),
                ErrorKind::ServiceUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
                }
                ErrorKind::ContextTooLarge => (StatusCode::BAD_REQUEST, "context_too_large"),
                ErrorKind::InvalidResponse => (StatusCode::BAD_GATEWAY, "invalid_response"),
                ErrorKind::UnknownError => (StatusCode::INTERNAL_SERVER_ERROR, "unknown_error"),
            },
            ServiceError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
            ServiceError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_maps_to_401() {
        let err = ServiceError::Core(CoreError::AuthenticationFailed {
            provider: "openai".to_string(),
            reason: "bad key".to_string(),
        });
        assert_eq!(err.status_and_type().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limit_maps_to_429() {
        let err = ServiceError::Core(CoreError::RateLimitExceeded {
            provider: "openai".to_string(),
        });
        assert_eq!(err.status_and_type().0, StatusCode::TOO_MANY_REQUESTS);
    }
}
