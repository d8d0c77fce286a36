//! # Authentication
//!
//! SPEC_FULL.md §14 drops the teacher's JWT-based auth/session system
//! entirely (out of scope) but keeps the ambient "a service exposed over a
//! network has *some* gate" concern as a minimal optional static API-key
//! header check, in the teacher's `axum::middleware::from_fn_with_state`
//! idiom (see the teacher's `middleware::auth_middleware`).

use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({
            "error": {
                "message": message,
                "type": "authentication_error",
                "code": 401,
            }
        })),
    )
        .into_response()
}

/// No-op when `auth.api_key` is unset. Otherwise requires
/// `Authorization: Bearer <key>` to match exactly.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.auth.api_key.as_deref() else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(key) if key == expected => next.run(req).await,
        Some(_) => unauthorized("invalid API key"),
        None => unauthorized("missing Authorization header"),
    }
}
