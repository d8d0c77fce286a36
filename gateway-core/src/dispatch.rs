//! # Dispatch Engine (C9)
//!
//! The single owner of the pending queue and the active-request map: a
//! mutex-protected struct with single-writer invariants, chosen over a full
//! actor/message-passing rewrite because every collaborator here
//! ([`crate::registry::ProviderRegistry`],
//! [`crate::connection::ConnectionManager`]) is already `Arc<RwLock<..>>` or
//! `DashMap`-based, and a mutex owner is the smaller idiomatic step from that
//! code, not a redesign.
//!
//! Everything else in the crate is a collaborator this module drives:
//! registry for provider/model resolution, connection manager and circuit
//! breaker for admission control, the rate limiter for per-provider
//! throttling, the trackers for cost/health telemetry, and the error
//! taxonomy for retry/fallback policy. None of those modules know about each
//! other; this one ties them together.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::ProviderDescriptor;
use crate::connection::{ConnectionManager, ConnectionRecord, ConnectionState};
use crate::error::{ErrorKind, GatewayError};
use crate::models::{
    Accumulated, Choice, Chunk, CompletionParams, Message, Request, RequestStatus, Response,
};
use crate::providers::{Feature, Provider};
use crate::rate_limiter::TokenBucket;
use crate::registry::ProviderRegistry;
use crate::trackers::{CostFilter, CostSummary, CostTracker, HealthTracker, ProviderHealthSummary};
use crate::user_prefs::UserPreferences;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// `{model, provider, available}` triple for [`DispatchEngine::list_models`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub provider: String,
    pub available: bool,
}

/// The three possible outcomes of [`DispatchEngine::get_result`]: a
/// completed response, a terminal error, or still pending.
#[derive(Debug)]
pub enum RequestOutcome {
    Ready(Result<Response, GatewayError>),
    Pending,
}

/// Tuning knobs that aren't part of any single provider's descriptor.
#[derive(Debug, Clone)]
pub struct DispatchEngineConfig {
    /// Circuit breaker configuration shared by every provider's breaker.
    pub breaker: CircuitBreakerConfig,
    /// Queue processor tick interval (default 100ms).
    pub queue_tick: Duration,
    /// Whether a terminally-failed request is converted into a synthetic
    /// degraded [`Response`] instead of surfacing the error. Off by default.
    pub graceful_degradation: bool,
}

impl Default for DispatchEngineConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            queue_tick: Duration::from_millis(100),
            graceful_degradation: false,
        }
    }
}

struct ActiveEntry {
    request: Request,
    reply: Option<oneshot::Sender<Result<Response, GatewayError>>>,
    /// Set once the request has actually been handed to a worker task, so
    /// the completion handler knows whether to decrement the provider's
    /// active-request counter: a request that failed before ever executing
    /// never incremented it, and the counter must never go negative.
    executing: bool,
}

struct QueueEntry {
    request: Request,
    reply: Option<oneshot::Sender<Result<Response, GatewayError>>>,
}

#[derive(Default)]
struct EngineState {
    queue: VecDeque<QueueEntry>,
    active: HashMap<String, ActiveEntry>,
}

/// Single owner of the pending queue and active-request map. Provider
/// registry, connection manager, and per-provider
/// breakers/limiters are held alongside it but are independently
/// concurrency-safe, so only the queue/active-map mutation needs to be
/// serialized through one lock.
pub struct DispatchEngine {
    registry: Arc<ProviderRegistry>,
    connection: Arc<ConnectionManager>,
    user_prefs: Arc<dyn UserPreferences>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    limiters: Mutex<HashMap<String, TokenBucket>>,
    active_counts: DashMap<String, Arc<AtomicU32>>,
    state: Mutex<EngineState>,
    health: Mutex<HealthTracker>,
    cost: Mutex<CostTracker>,
    config: DispatchEngineConfig,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        connection: Arc<ConnectionManager>,
        user_prefs: Arc<dyn UserPreferences>,
        config: DispatchEngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            connection,
            user_prefs,
            breakers: DashMap::new(),
            limiters: Mutex::new(HashMap::new()),
            active_counts: DashMap::new(),
            state: Mutex::new(EngineState::default()),
            health: Mutex::new(HealthTracker::new(Duration::from_secs(24 * 3600))),
            cost: Mutex::new(CostTracker::new()),
            config,
        })
    }

    /// Register a provider with its adapter, creating its breaker and
    /// rate-limit bucket.
    pub fn register_provider(
        &self,
        adapter: Arc<dyn Provider>,
        descriptor: ProviderDescriptor,
    ) -> Result<(), String> {
        let name = descriptor.name.clone();
        self.registry.register(adapter, descriptor)?;
        self.breakers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.breaker.clone())));
        Ok(())
    }

    fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider.to_string(),
                    self.config.breaker.clone(),
                ))
            })
            .clone()
    }

    fn active_counter(&self, provider: &str) -> Arc<AtomicU32> {
        self.active_counts
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone()
    }

    /// Current in-flight adapter invocations against `provider`: always
    /// equal to the count of actually-executing calls.
    pub fn active_requests(&self, provider: &str) -> u32 {
        self.active_counter(provider).load(Ordering::SeqCst)
    }

    async fn try_acquire(&self, provider: &str) -> bool {
        let descriptor = match self.registry.descriptor(provider) {
            Some(d) => d,
            None => return false,
        };
        match &descriptor.rate_limit {
            None => true,
            Some(setting) => {
                let mut limiters = self.limiters.lock().await;
                let bucket = limiters
                    .entry(provider.to_string())
                    .or_insert_with(|| TokenBucket::new(setting));
                bucket.try_acquire()
            }
        }
    }

    async fn has_rate_capacity(&self, provider: &str) -> bool {
        let descriptor = match self.registry.descriptor(provider) {
            Some(d) => d,
            None => return false,
        };
        match &descriptor.rate_limit {
            None => true,
            Some(setting) => {
                let mut limiters = self.limiters.lock().await;
                let bucket = limiters
                    .entry(provider.to_string())
                    .or_insert_with(|| TokenBucket::new(setting));
                bucket.has_capacity()
            }
        }
    }

    /// Resolve `(provider, model)` for a completion request. A user's own
    /// pin, if any, overrides the registry's model→provider default for
    /// that user's request only.
    fn resolve_provider_and_model(
        &self,
        params: &CompletionParams,
    ) -> Result<(String, String), GatewayError> {
        if let Some(user_id) = &params.options.user_id {
            if let Some((provider, model)) = self.user_prefs.default_provider_and_model(user_id) {
                return Ok((provider, model));
            }
            if let Some(provider) = &params.provider {
                if let Some(model) = self.user_prefs.provider_default_model(user_id, provider) {
                    return Ok((provider.clone(), model));
                }
            }
        }

        if let Some(provider) = &params.provider {
            return Ok((provider.clone(), params.model.clone()));
        }

        self.registry
            .provider_for_model(&params.model)
            .map(|provider| (provider, params.model.clone()))
            .ok_or_else(|| GatewayError::UnknownModel {
                model: params.model.clone(),
            })
    }

    /// Validate caller input: model and messages non-empty, message content
    /// non-empty, temperature in range, max_tokens positive if set.
    fn validate_params(params: &CompletionParams) -> Result<(), GatewayError> {
        if params.model.trim().is_empty() {
            return Err(GatewayError::InvalidRequest {
                message: "model must not be empty".to_string(),
            });
        }
        if params.messages.is_empty() {
            return Err(GatewayError::InvalidRequest {
                message: "messages must not be empty".to_string(),
            });
        }
        for message in &params.messages {
            if message.content.trim().is_empty() {
                return Err(GatewayError::InvalidRequest {
                    message: "message content must not be empty".to_string(),
                });
            }
        }
        if !(0.0..=2.0).contains(&params.options.temperature) {
            return Err(GatewayError::InvalidRequest {
                message: "temperature must be within [0, 2]".to_string(),
            });
        }
        if let Some(max_tokens) = params.options.max_tokens {
            if max_tokens == 0 {
                return Err(GatewayError::InvalidRequest {
                    message: "max_tokens must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Synchronous completion: blocks the caller until a result is ready.
    pub async fn completion(
        self: &Arc<Self>,
        params: CompletionParams,
    ) -> Result<Response, GatewayError> {
        Self::validate_params(&params)?;
        let (provider, model) = self.resolve_provider_and_model(&params)?;

        let mut params = params;
        params.model = model;
        let request = Request::new(uuid::Uuid::new_v4().to_string(), provider, params, false);

        let (tx, rx) = oneshot::channel();
        self.dispatch(request, Some(tx), Vec::new()).await;

        rx.await.map_err(|_| GatewayError::Unknown {
            provider: "dispatch".to_string(),
            message: "reply channel closed before completion".to_string(),
        })?
    }

    /// Asynchronous completion: enqueues and returns the request id
    /// immediately.
    pub async fn completion_async(
        self: &Arc<Self>,
        params: CompletionParams,
    ) -> Result<String, GatewayError> {
        Self::validate_params(&params)?;
        let (provider, model) = self.resolve_provider_and_model(&params)?;

        let mut params = params;
        params.model = model;
        let id = uuid::Uuid::new_v4().to_string();
        let request = Request::new(id.clone(), provider, params, true);

        self.dispatch(request, None, Vec::new()).await;
        Ok(id)
    }

    /// Poll the active map for a terminal result, up to `timeout`. Removes
    /// the entry once terminal.
    pub async fn get_result(&self, request_id: &str, timeout: Duration) -> RequestOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                match state.active.get(request_id).map(|e| e.request.status) {
                    Some(RequestStatus::Completed) | Some(RequestStatus::Failed) => {
                        let entry = state.active.remove(request_id).expect("just matched");
                        let result = match entry.request.response {
                            Some(response) => Ok(response),
                            None => Err(entry.request.error.unwrap_or(GatewayError::Unknown {
                                provider: "unknown".to_string(),
                                message: "terminal request carried no result".to_string(),
                            })),
                        };
                        return RequestOutcome::Ready(result);
                    }
                    Some(_) => {}
                    None => {
                        return RequestOutcome::Ready(Err(GatewayError::InvalidRequest {
                            message: format!("unknown request id {request_id}"),
                        }));
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return RequestOutcome::Pending;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stream a completion: resolves, checks the adapter supports
    /// streaming, and runs it on its own task, delivering chunks to `emit`
    /// in vendor order.
    pub async fn completion_stream<F>(
        self: &Arc<Self>,
        params: CompletionParams,
        mut emit: F,
    ) -> Result<tokio::task::JoinHandle<Result<Accumulated, GatewayError>>, GatewayError>
    where
        F: FnMut(Chunk) + Send + 'static,
    {
        Self::validate_params(&params)?;
        let (provider, model) = self.resolve_provider_and_model(&params)?;

        let adapter = self
            .registry
            .get(&provider)
            .ok_or_else(|| GatewayError::ProviderNotConfigured {
                provider: provider.clone(),
            })?;
        if !adapter.supports(Feature::Streaming) {
            return Err(GatewayError::ModelNotAvailable {
                provider: provider.clone(),
                model: model.clone(),
            });
        }
        if !self.connection.is_available(&provider).await {
            return Err(GatewayError::ProviderNotConnected { provider });
        }

        let breaker = self.breaker_for(&provider);
        if !breaker.ready().await {
            return Err(GatewayError::AllProvidersUnavailable { model });
        }

        let descriptor =
            self.registry
                .descriptor(&provider)
                .ok_or_else(|| GatewayError::ProviderNotConfigured {
                    provider: provider.clone(),
                })?;

        let mut params = params;
        params.model = model;
        let request = Request::new(uuid::Uuid::new_v4().to_string(), provider.clone(), params, false);
        let submitted_at = request.submitted_at;

        self.active_counter(&provider).fetch_add(1, Ordering::SeqCst);
        self.connection.mark_used(&provider).await;

        let engine = Arc::clone(self);
        let provider_for_task = provider.clone();
        let handle = tokio::spawn(async move {
            let mut chunks = Vec::new();
            let mut sink = |chunk: Chunk| {
                chunks.push(chunk.clone());
                emit(chunk);
            };
            let outcome = adapter.stream(&request, &descriptor, &mut sink).await;

            engine
                .active_counter(&provider_for_task)
                .fetch_sub(1, Ordering::SeqCst);
            let breaker = engine.breaker_for(&provider_for_task);
            let latency_ms = (chrono::Utc::now() - submitted_at).num_milliseconds().max(0) as u64;

            match outcome {
                Ok(()) => {
                    breaker.on_success().await;
                    engine
                        .health
                        .lock()
                        .await
                        .record_success(&provider_for_task, latency_ms);
                    let accumulated = crate::models::accumulate(&chunks);
                    if let Some(usage) = accumulated.usage {
                        engine.cost.lock().await.record(
                            &provider_for_task,
                            &request.model,
                            usage.prompt_tokens,
                            usage.completion_tokens,
                        );
                    }
                    Ok(accumulated)
                }
                Err(err) => {
                    if err.kind().trips_breaker() {
                        breaker.on_failure().await;
                    }
                    engine
                        .health
                        .lock()
                        .await
                        .record_failure(&provider_for_task, err.to_string());
                    Err(err)
                }
            }
        });

        Ok(handle)
    }

    pub async fn list_models(&self) -> Vec<ModelInfo> {
        let mut out = Vec::new();
        for (model, provider) in self.registry.list_models() {
            let available = self.connection.is_available(&provider).await;
            out.push(ModelInfo {
                model,
                provider,
                available,
            });
        }
        out
    }

    pub async fn health_status(&self) -> HashMap<String, ProviderHealthSummary> {
        let health = self.health.lock().await;
        self.registry
            .provider_names()
            .into_iter()
            .map(|name| {
                let summary = health.summary(&name);
                (name, summary)
            })
            .collect()
    }

    pub async fn cost_summary(&self, filter: CostFilter) -> CostSummary {
        self.cost.lock().await.summary(&filter)
    }

    pub async fn cost_csv(&self) -> String {
        self.cost.lock().await.to_csv()
    }

    pub fn reload_config(&self) {
        self.registry.rebuild_model_index();
    }

    pub async fn update_provider_config(
        &self,
        name: &str,
        descriptor: ProviderDescriptor,
    ) -> Result<(), String> {
        self.registry.update_descriptor(name, descriptor.clone())?;
        self.registry.rebuild_model_index();
        if let Some(setting) = &descriptor.rate_limit {
            self.limiters
                .lock()
                .await
                .insert(name.to_string(), TokenBucket::new(setting));
        }
        Ok(())
    }

    pub fn get_provider_config(&self, name: &str) -> Option<ProviderDescriptor> {
        self.registry.descriptor(name)
    }

    pub async fn connect_provider(&self, name: &str) -> Result<ConnectionState, GatewayError> {
        let adapter = self
            .registry
            .get(name)
            .ok_or_else(|| GatewayError::ProviderNotConfigured {
                provider: name.to_string(),
            })?;
        let descriptor =
            self.registry
                .descriptor(name)
                .ok_or_else(|| GatewayError::ProviderNotConfigured {
                    provider: name.to_string(),
                })?;
        let ok = adapter.connect(&descriptor).await.is_ok();
        Ok(self.connection.connect(name, ok).await)
    }

    pub async fn disconnect_provider(&self, name: &str) -> Result<ConnectionState, GatewayError> {
        if let (Some(adapter), Some(descriptor)) =
            (self.registry.get(name), self.registry.descriptor(name))
        {
            let _ = adapter.disconnect(&descriptor).await;
        }
        Ok(self.connection.disconnect(name).await)
    }

    pub async fn connect_all(&self) {
        self.connection
            .connect_all(&self.registry.provider_names())
            .await;
    }

    pub async fn disconnect_all(&self) {
        self.connection
            .disconnect_all(&self.registry.provider_names())
            .await;
    }

    pub async fn connection_status(&self) -> HashMap<String, ConnectionRecord> {
        self.connection.status().await
    }

    pub async fn set_provider_enabled(&self, name: &str, enabled: bool) {
        self.connection.set_enabled(name, enabled).await;
    }

    pub fn spawn_queue_processor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let tick = engine.config.queue_tick;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                engine.process_queue_tick().await;
            }
        })
    }

    /// One tick of the queue processor (spec.md §4.9.2): look only at the
    /// head. If its provider is currently dispatchable, dispatch it;
    /// otherwise put it back and do nothing else this tick. No reordering.
    async fn process_queue_tick(self: &Arc<Self>) {
        let head = {
            let mut state = self.state.lock().await;
            state.queue.pop_front()
        };
        let Some(entry) = head else { return };

        let provider = entry.request.provider.clone();
        let admits = self.breaker_for(&provider).would_admit().await;
        let has_capacity = self.has_rate_capacity(&provider).await;

        if admits && has_capacity {
            self.dispatch_queued(entry.request, entry.reply).await;
        } else {
            let mut state = self.state.lock().await;
            state.queue.push_front(entry);
        }
    }

    async fn dispatch_queued(
        self: &Arc<Self>,
        request: Request,
        reply: Option<oneshot::Sender<Result<Response, GatewayError>>>,
    ) {
        let provider = request.provider.clone();
        if !self.try_acquire(&provider).await {
            let mut state = self.state.lock().await;
            state
                .queue
                .push_front(QueueEntry { request, reply });
            return;
        }
        self.begin_execution(request, reply).await;
    }

    /// Find a fallback provider for `model`, excluding `failed` and anything
    /// already `visited` in this dispatch chain (spec.md §4.9.1 step 5):
    /// connected, breaker would admit, smallest `priority`, ties broken by
    /// registration order (guaranteed by
    /// [`ProviderRegistry::providers_for_model`]'s insertion-ordered output).
    async fn find_fallback(&self, failed: &str, model: &str, visited: &[String]) -> Option<String> {
        let mut candidates = Vec::new();
        for descriptor in self.registry.providers_for_model(model) {
            if descriptor.name == failed || visited.contains(&descriptor.name) {
                continue;
            }
            if !self.connection.is_available(&descriptor.name).await {
                continue;
            }
            if !self.breaker_for(&descriptor.name).would_admit().await {
                continue;
            }
            candidates.push(descriptor);
        }
        candidates.into_iter().min_by_key(|d| d.priority).map(|d| d.name)
    }

    /// The dispatch algorithm (spec.md §4.9.1), recursive over fallback
    /// attempts. Boxed because async fns can't recurse directly.
    fn dispatch<'a>(
        self: &'a Arc<Self>,
        request: Request,
        reply: Option<oneshot::Sender<Result<Response, GatewayError>>>,
        visited: Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let provider = request.provider.clone();

            if !self.connection.is_available(&provider).await {
                if let Some(next) = self.find_fallback(&provider, &request.model, &visited).await {
                    let mut fallback_request = request.clone();
                    fallback_request.provider = next;
                    let mut visited = visited;
                    visited.push(provider);
                    return self.dispatch(fallback_request, reply, visited).await;
                }
                self.fail_immediately(
                    request,
                    reply,
                    GatewayError::ProviderNotConnected { provider },
                )
                .await;
                return;
            }

            let breaker = self.breaker_for(&provider);
            if !breaker.would_admit().await {
                if let Some(next) = self.find_fallback(&provider, &request.model, &visited).await {
                    let mut fallback_request = request.clone();
                    fallback_request.provider = next;
                    let mut visited = visited;
                    visited.push(provider);
                    return self.dispatch(fallback_request, reply, visited).await;
                }
                self.fail_immediately(
                    request,
                    reply,
                    GatewayError::AllProvidersUnavailable {
                        model: request.model.clone(),
                    },
                )
                .await;
                return;
            }

            if !self.try_acquire(&provider).await {
                let mut state = self.state.lock().await;
                state.active.insert(
                    request.id.clone(),
                    ActiveEntry {
                        request: request.clone(),
                        reply: None,
                        executing: false,
                    },
                );
                state.queue.push_back(QueueEntry { request, reply });
                return;
            }

            self.begin_execution(request, reply).await;
        })
    }

    async fn fail_immediately(
        self: &Arc<Self>,
        request: Request,
        reply: Option<oneshot::Sender<Result<Response, GatewayError>>>,
        err: GatewayError,
    ) {
        let request_id = request.id.clone();
        {
            let mut state = self.state.lock().await;
            state.active.insert(
                request_id.clone(),
                ActiveEntry {
                    request,
                    reply,
                    executing: false,
                },
            );
        }
        self.complete(request_id, Err(err)).await;
    }

    /// Hand a request to a worker task (spec.md §4.9.1 step 4a/b): insert
    /// into the active map, account for it, reserve the breaker's half-open
    /// probe slot if applicable, then spawn the adapter invocation.
    async fn begin_execution(
        self: &Arc<Self>,
        mut request: Request,
        reply: Option<oneshot::Sender<Result<Response, GatewayError>>>,
    ) {
        request.status = RequestStatus::Processing;
        let provider = request.provider.clone();
        let request_id = request.id.clone();

        {
            let mut state = self.state.lock().await;
            state.active.insert(
                request_id.clone(),
                ActiveEntry {
                    request: request.clone(),
                    reply,
                    executing: true,
                },
            );
        }
        self.active_counter(&provider).fetch_add(1, Ordering::SeqCst);
        self.connection.mark_used(&provider).await;

        let breaker = self.breaker_for(&provider);
        breaker.ready().await;

        let (adapter, descriptor) =
            match (self.registry.get(&provider), self.registry.descriptor(&provider)) {
                (Some(adapter), Some(descriptor)) => (adapter, descriptor),
                _ => {
                    self.complete(
                        request_id,
                        Err(GatewayError::ProviderNotConfigured { provider }),
                    )
                    .await;
                    return;
                }
            };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = execute_with_recovery(adapter.as_ref(), &descriptor, request).await;
            engine.complete(request_id, result).await;
        });
    }

    /// The completion handler (spec.md §4.9.4): records the outcome against
    /// the breaker and trackers, replies to a sync caller, and (for async
    /// requests) leaves the active-map entry terminal for later pickup.
    async fn complete(
        self: &Arc<Self>,
        request_id: String,
        mut result: Result<Response, GatewayError>,
    ) {
        let (provider, reply, is_async, executing, submitted_at) = {
            let mut state = self.state.lock().await;
            let entry = match state.active.get_mut(&request_id) {
                Some(entry) => entry,
                None => return,
            };
            entry.request.status = if result.is_ok() {
                RequestStatus::Completed
            } else {
                RequestStatus::Failed
            };
            match &result {
                Ok(response) => entry.request.response = Some(response.clone()),
                Err(err) => entry.request.error = Some(err.clone()),
            }
            (
                entry.request.provider.clone(),
                entry.reply.take(),
                entry.request.is_async,
                entry.executing,
                entry.request.submitted_at,
            )
        };

        if executing {
            self.active_counter(&provider).fetch_sub(1, Ordering::SeqCst);

            let breaker = self.breaker_for(&provider);
            let latency_ms = (chrono::Utc::now() - submitted_at).num_milliseconds().max(0) as u64;

            match &result {
                Ok(response) => {
                    breaker.on_success().await;
                    self.health.lock().await.record_success(&provider, latency_ms);
                    if let Some(usage) = response.usage {
                        self.cost.lock().await.record(
                            &provider,
                            &response.model,
                            usage.prompt_tokens,
                            usage.completion_tokens,
                        );
                    }
                }
                Err(err) => {
                    if err.kind().trips_breaker() {
                        breaker.on_failure().await;
                    }
                    self.health
                        .lock()
                        .await
                        .record_failure(&provider, err.to_string());
                }
            }
        }

        if self.config.graceful_degradation {
            if let Err(err) = &result {
                let degraded = degraded_response(&request_id, &provider, err);
                result = Ok(degraded.clone());
                let mut state = self.state.lock().await;
                if let Some(entry) = state.active.get_mut(&request_id) {
                    entry.request.status = RequestStatus::Completed;
                    entry.request.response = Some(degraded);
                    entry.request.error = None;
                }
            }
        }

        if !is_async {
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            self.state.lock().await.active.remove(&request_id);
        }
    }
}

/// Construct the graceful-degradation synthetic response (spec.md §7, §4.10
/// "human-readable explanation derived from the error kind").
fn degraded_response(request_id: &str, provider: &str, err: &GatewayError) -> Response {
    let mut metadata = HashMap::new();
    metadata.insert("degraded".to_string(), "true".to_string());
    Response {
        id: request_id.to_string(),
        model: String::new(),
        provider: provider.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(err.kind().user_message().to_string()),
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
        created_at: chrono::Utc::now(),
        metadata,
        cached: false,
    }
}

/// Per-request backoff curve (spec.md §4.9.3): `min(2^attempt * base + jitter,
/// 30s)`, where `base` is 5s for `rate_limit_exceeded` and 1s otherwise.
fn backoff_delay(kind: ErrorKind, attempt: u32) -> Duration {
    let base_ms: u64 = if matches!(kind, ErrorKind::RateLimitExceeded) {
        5_000
    } else {
        1_000
    };
    let scaled = base_ms.saturating_mul(1u64 << attempt.min(20));
    let jitter_ms = rand::thread_rng().gen_range(0..=250);
    Duration::from_millis(scaled.saturating_add(jitter_ms).min(30_000))
}

/// Execute the adapter call with bounded retry and context-shrink recovery
/// (spec.md §4.9.3, §4.10 `context_too_large`, §8 scenario 6). A single
/// adapter invocation here may retry several times against the *same*
/// provider; circuit breaker bookkeeping happens once, at the dispatch
/// engine's completion handler, for the invocation's final outcome.
async fn execute_with_recovery(
    adapter: &dyn Provider,
    descriptor: &ProviderDescriptor,
    mut request: Request,
) -> Result<Response, GatewayError> {
    let mut attempt: u32 = 0;
    let mut context_simplified = false;
    let original_message_count = request.messages.len();

    loop {
        match adapter.execute(&request, descriptor).await {
            Ok(mut response) => {
                if context_simplified {
                    response
                        .metadata
                        .insert("context_simplified".to_string(), "true".to_string());
                    response.metadata.insert(
                        "original_message_count".to_string(),
                        original_message_count.to_string(),
                    );
                    response.metadata.insert(
                        "simplified_message_count".to_string(),
                        request.messages.len().to_string(),
                    );
                }
                return Ok(response);
            }
            Err(err) => {
                let kind = err.kind();

                if kind == ErrorKind::ContextTooLarge
                    && !context_simplified
                    && request.messages.len() > 2
                {
                    let keep_from = request.messages.len() - 2;
                    request.messages = request.messages.split_off(keep_from);
                    context_simplified = true;
                    continue;
                }

                if !kind.recoverable() {
                    return Err(err);
                }

                attempt += 1;
                let max_retries = descriptor.max_retries.min(kind.max_retries());
                if attempt > max_retries {
                    return Err(err);
                }

                tokio::time::sleep(backoff_delay(kind, attempt)).await;
            }
        }
    }
}
