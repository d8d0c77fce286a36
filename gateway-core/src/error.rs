//! # Error Taxonomy & Recovery (C10)
//!
//! Every failure the dispatch engine can observe — from a malformed caller
//! request to a vendor 503 — is classified into one [`ErrorKind`]. The kind
//! carries the policy (is it ever worth retrying? how many times? does it
//! trip the circuit breaker?) so [`crate::dispatch::DispatchEngine`] never
//! has to special-case a vendor or a status code directly; it just asks the
//! kind what to do (spec.md §4.10, §7).

use thiserror::Error;

/// How serious an error is, independent of whether it's recoverable.
///
/// `Critical` errors (auth failures, configuration problems) are surfaced
/// to the caller verbatim and never trip the circuit breaker — a bad API
/// key should not make a healthy provider look unhealthy (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The taxonomy from spec.md §4.10, carrying the retry/fallback policy for
/// each kind rather than leaving it to call sites to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    UnknownModel,
    ProviderNotConfigured,
    ProviderNotConnected,
    ModelNotAvailable,
    AllProvidersUnavailable,
    AuthenticationFailed,
    RateLimitExceeded,
    Timeout,
    NetworkError,
    ServiceUnavailable,
    ContextTooLarge,
    InvalidResponse,
    UnknownError,
}

impl ErrorKind {
    /// Whether a retry against the *same* provider can ever succeed.
    pub fn recoverable(self) -> bool {
        !matches!(
            self,
            ErrorKind::InvalidRequest
                | ErrorKind::ProviderNotConfigured
                | ErrorKind::ProviderNotConnected
                | ErrorKind::ModelNotAvailable
                | ErrorKind::AllProvidersUnavailable
                | ErrorKind::AuthenticationFailed
        )
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::AuthenticationFailed => Severity::Critical,
            ErrorKind::InvalidRequest
            | ErrorKind::UnknownModel
            | ErrorKind::ProviderNotConfigured
            | ErrorKind::ProviderNotConnected
            | ErrorKind::ModelNotAvailable
            | ErrorKind::AllProvidersUnavailable => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Maximum retry attempts *within a single adapter invocation*
    /// (spec.md §4.10 per-kind limits; §4.9.3 governs the backoff curve).
    pub fn max_retries(self) -> u32 {
        match self {
            ErrorKind::RateLimitExceeded => 3,
            ErrorKind::Timeout => 2,
            ErrorKind::NetworkError => 3,
            ErrorKind::ServiceUnavailable => 2,
            ErrorKind::ContextTooLarge => 1,
            ErrorKind::InvalidResponse => 1,
            ErrorKind::UnknownError => 1,
            _ => 0,
        }
    }

    /// Whether this error should trip the provider's circuit breaker.
    /// Authentication/configuration errors never do (spec.md §7): a bad
    /// key should not make a healthy peer look unhealthy. Everything else,
    /// including a throttled provider, counts against it.
    pub fn trips_breaker(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::NetworkError
                | ErrorKind::ServiceUnavailable
                | ErrorKind::InvalidResponse
                | ErrorKind::UnknownError
                | ErrorKind::RateLimitExceeded
        )
    }

    /// A short, vendor-agnostic explanation suitable for a graceful
    /// degradation response (spec.md §4.10, §7 — never leak vendor bodies
    /// directly).
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "the request was malformed",
            ErrorKind::UnknownModel => "no configured provider serves that model",
            ErrorKind::ProviderNotConfigured => "the provider is not configured",
            ErrorKind::ProviderNotConnected => "the provider is not currently connected",
            ErrorKind::ModelNotAvailable => "the model is not available on this provider",
            ErrorKind::AllProvidersUnavailable => {
                "all providers capable of serving this model are currently unavailable"
            }
            ErrorKind::AuthenticationFailed => "authentication with the provider failed",
            ErrorKind::RateLimitExceeded => "the provider's rate limit was exceeded",
            ErrorKind::Timeout => "the request timed out",
            ErrorKind::NetworkError => "a network error occurred while contacting the provider",
            ErrorKind::ServiceUnavailable => "the provider is temporarily unavailable",
            ErrorKind::ContextTooLarge => "the request context was too large for the model",
            ErrorKind::InvalidResponse => "the provider returned an invalid response",
            ErrorKind::UnknownError => "an unknown error occurred",
        }
    }

    /// Map an upstream HTTP status code to a kind (spec.md §4.10).
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::AuthenticationFailed,
            429 => ErrorKind::RateLimitExceeded,
            500 | 503 => ErrorKind::ServiceUnavailable,
            _ => ErrorKind::NetworkError,
        }
    }
}

/// The concrete error type threaded through the crate.
///
/// Collapsed into one taxonomy rather than the teacher's separate
/// `ClientError`/`ProviderError` split: spec.md §9 resolves the source's
/// duplicated `Config`/`Service` variants into one coherent behavior, and
/// a single error type with a [`GatewayError::kind`] accessor serves both
/// "what does the adapter see" and "what does the caller see" without a
/// second conversion layer.
///
/// `Clone` is derived deliberately: the dispatch engine needs to hand the
/// same failure both to a waiting sync caller (via a oneshot reply) and to
/// the `ActiveMap` entry an async caller will later poll, so the transport
/// error is captured as a formatted string rather than the non-`Clone`
/// `reqwest::Error` itself (see the `From` impl below).
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("unknown model: {model}")]
    UnknownModel { model: String },

    #[error("provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },

    #[error("provider not connected: {provider}")]
    ProviderNotConnected { provider: String },

    #[error("model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("all providers capable of serving model {model} are unavailable")]
    AllProvidersUnavailable { model: String },

    #[error("authentication failed for provider {provider}: {reason}")]
    AuthenticationFailed { provider: String, reason: String },

    #[error("rate limit exceeded for provider {provider}")]
    RateLimitExceeded { provider: String },

    #[error("request to provider {provider} timed out")]
    Timeout { provider: String },

    #[error("network error contacting provider {provider}: {message}")]
    NetworkError { provider: String, message: String },

    #[error("provider {provider} service unavailable: {message}")]
    ServiceUnavailable { provider: String, message: String },

    #[error("context too large for provider {provider}")]
    ContextTooLarge { provider: String },

    #[error("invalid response from provider {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("http transport error: {0}")]
    Http(String),

    #[error("http request timed out: {0}")]
    HttpTimeout(String),

    #[error("unknown error from provider {provider}: {message}")]
    Unknown { provider: String, message: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::HttpTimeout(err.to_string())
        } else {
            GatewayError::Http(err.to_string())
        }
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            GatewayError::UnknownModel { .. } => ErrorKind::UnknownModel,
            GatewayError::ProviderNotConfigured { .. } => ErrorKind::ProviderNotConfigured,
            GatewayError::ProviderNotConnected { .. } => ErrorKind::ProviderNotConnected,
            GatewayError::ModelNotAvailable { .. } => ErrorKind::ModelNotAvailable,
            GatewayError::AllProvidersUnavailable { .. } => ErrorKind::AllProvidersUnavailable,
            GatewayError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            GatewayError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::NetworkError { .. } => ErrorKind::NetworkError,
            GatewayError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            GatewayError::ContextTooLarge { .. } => ErrorKind::ContextTooLarge,
            GatewayError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            GatewayError::Http(_) => ErrorKind::NetworkError,
            GatewayError::HttpTimeout(_) => ErrorKind::Timeout,
            GatewayError::Unknown { .. } => ErrorKind::UnknownError,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            GatewayError::ProviderNotConfigured { provider }
            | GatewayError::ProviderNotConnected { provider }
            | GatewayError::ModelNotAvailable { provider, .. }
            | GatewayError::AuthenticationFailed { provider, .. }
            | GatewayError::RateLimitExceeded { provider }
            | GatewayError::Timeout { provider }
            | GatewayError::NetworkError { provider, .. }
            | GatewayError::ServiceUnavailable { provider, .. }
            | GatewayError::ContextTooLarge { provider }
            | GatewayError::InvalidResponse { provider, .. }
            | GatewayError::Unknown { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_never_trip_breaker() {
        assert!(!ErrorKind::AuthenticationFailed.trips_breaker());
        assert!(!ErrorKind::AuthenticationFailed.recoverable());
    }

    #[test]
    fn rate_limit_allows_three_retries() {
        assert_eq!(ErrorKind::RateLimitExceeded.max_retries(), 3);
        assert!(ErrorKind::RateLimitExceeded.recoverable());
    }

    #[test]
    fn http_status_mapping_matches_spec() {
        assert_eq!(
            ErrorKind::from_http_status(401),
            ErrorKind::AuthenticationFailed
        );
        assert_eq!(
            ErrorKind::from_http_status(429),
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(
            ErrorKind::from_http_status(500),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(
            ErrorKind::from_http_status(503),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(ErrorKind::from_http_status(418), ErrorKind::NetworkError);
    }
}
