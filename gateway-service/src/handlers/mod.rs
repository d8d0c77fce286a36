//! # HTTP Handlers
//!
//! Thin translation layer between axum and `gateway_core::DispatchEngine`
//! (SPEC_FULL.md §12): every handler here does request extraction, calls
//! straight into the engine, and maps the result to JSON (or, for
//! `options.stream=true` completions, an SSE body). No routing policy,
//! retry, or provider logic lives here — that's the engine's job.

use crate::gateway_error::ServiceError;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use gateway_core::{CompletionParams, CostFilter, ProviderDescriptor, RequestOutcome};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// `POST /v1/chat/completions`. Dispatches through `completion_stream` when
/// `options.stream` is set, otherwise through `completion`.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(params): Json<CompletionParams>,
) -> Result<Response, ServiceError> {
    if params.options.stream {
        return Ok(chat_completions_stream(state, params).await.into_response());
    }

    let response = state.engine.completion(params).await?;
    Ok(Json(response).into_response())
}

async fn chat_completions_stream(
    state: AppState,
    params: CompletionParams,
) -> impl IntoResponse {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = state
        .engine
        .completion_stream(params, move |chunk| {
            let _ = tx.send(chunk);
        })
        .await;

    if let Err(err) = handle {
        return ServiceError::from(err).into_response();
    }

    let stream = UnboundedReceiverStream::new(rx).map(|chunk| {
        Ok::<Event, Infallible>(
            Event::default()
                .json_data(chunk)
                .unwrap_or_else(|_| Event::default().data("{}")),
        )
    });

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(stream);
    Sse::new(stream)
        .keep_alive(axum::response::sse::KeepAlive::new())
        .into_response()
}

/// `POST /v1/chat/completions/async`. Enqueues and returns the request id.
pub async fn chat_completions_async(
    State(state): State<AppState>,
    Json(params): Json<CompletionParams>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let id = state.engine.completion_async(params).await?;
    Ok(Json(json!({ "request_id": id })))
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    #[serde(default = "default_result_timeout_ms")]
    timeout_ms: u64,
}

fn default_result_timeout_ms() -> u64 {
    0
}

/// `GET /v1/chat/completions/{request_id}`. Polls `get_result`; a `pending`
/// outcome is reported as `202 Accepted` (spec.md §6).
pub async fn get_completion_result(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<ResultQuery>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .engine
        .get_result(&request_id, Duration::from_millis(query.timeout_ms))
        .await;

    match outcome {
        RequestOutcome::Ready(Ok(response)) => Ok(Json(response).into_response()),
        RequestOutcome::Ready(Err(err)) => Err(ServiceError::from(err)),
        RequestOutcome::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "pending", "request_id": request_id })),
        )
            .into_response()),
    }
}

/// `GET /v1/models`.
pub async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "models": state.engine.list_models().await }))
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "providers": state.engine.health_status().await }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CostQuery {
    since: Option<chrono::DateTime<chrono::Utc>>,
    provider: Option<String>,
    model: Option<String>,
}

/// `GET /costs?since=&provider=&model=`.
pub async fn cost_summary(
    State(state): State<AppState>,
    Query(query): Query<CostQuery>,
) -> Json<serde_json::Value> {
    let filter = CostFilter {
        since: query.since,
        provider: query.provider,
        model: query.model,
    };
    Json(json!(state.engine.cost_summary(filter).await))
}

/// `GET /costs.csv`.
pub async fn cost_csv(State(state): State<AppState>) -> Response {
    let csv = state.engine.cost_csv().await;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/csv")],
        csv,
    )
        .into_response()
}

/// `POST /admin/providers/{name}/config`.
pub async fn update_provider_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut descriptor): Json<ProviderDescriptor>,
) -> Result<StatusCode, ServiceError> {
    descriptor.name = name.clone();
    state
        .engine
        .update_provider_config(&name, descriptor)
        .await
        .map_err(ServiceError::BadRequest)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/providers/{name}/config`.
pub async fn get_provider_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProviderDescriptor>, ServiceError> {
    state
        .engine
        .get_provider_config(&name)
        .map(Json)
        .ok_or_else(|| ServiceError::BadRequest(format!("unknown provider {name}")))
}

/// `POST /admin/reload`.
pub async fn reload_config(State(state): State<AppState>) -> StatusCode {
    state.engine.reload_config();
    StatusCode::NO_CONTENT
}

/// `POST /admin/providers/{name}/connect`.
pub async fn connect_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let connection_state = state.engine.connect_provider(&name).await?;
    Ok(Json(json!({ "state": connection_state })))
}

/// `POST /admin/providers/{name}/disconnect`.
pub async fn disconnect_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let connection_state = state.engine.disconnect_provider(&name).await?;
    Ok(Json(json!({ "state": connection_state })))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledBody {
    enabled: bool,
}

/// `POST /admin/providers/{name}/enabled`.
pub async fn set_provider_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetEnabledBody>,
) -> StatusCode {
    state.engine.set_provider_enabled(&name, body.enabled).await;
    StatusCode::NO_CONTENT
}

/// `GET /admin/providers`.
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "providers": state.engine.connection_status().await }))
}
