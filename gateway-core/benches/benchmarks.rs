use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gateway_core::config::{ProviderDescriptor, RateLimitSetting, RateLimitWindow};
use gateway_core::{CircuitBreaker, CircuitBreakerConfig, ProviderRegistry, SseParser, TokenBucket};
use std::collections::HashSet;

fn descriptor(name: &str, models: &[String]) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.to_string(),
        adapter: "mock".to_string(),
        api_key: None,
        base_url: None,
        models: models.iter().cloned().collect::<HashSet<_>>(),
        priority: 0,
        rate_limit: None,
        max_retries: 3,
        timeout_ms: 30_000,
        headers: Default::default(),
        extra_options: Default::default(),
    }
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = ProviderRegistry::new();
    for i in 0..20 {
        let name = format!("provider-{i}");
        let models = vec![format!("model-{i}-a"), format!("model-{i}-b")];
        let adapter =
            gateway_core::create_provider(&descriptor(&name, &models)).expect("mock adapter");
        registry
            .register(adapter, descriptor(&name, &models))
            .expect("register");
    }

    c.bench_function("registry_provider_for_model", |b| {
        b.iter(|| registry.provider_for_model(black_box("model-10-a")));
    });

    c.bench_function("registry_list_models", |b| {
        b.iter(|| registry.list_models());
    });
}

fn bench_rate_limiter(c: &mut Criterion) {
    let setting = RateLimitSetting {
        limit: 1_000_000,
        window: RateLimitWindow::Minute,
    };

    c.bench_function("token_bucket_try_acquire", |b| {
        let mut bucket = TokenBucket::new(&setting);
        b.iter(|| bucket.try_acquire());
    });
}

fn bench_circuit_breaker(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let admit_breaker = CircuitBreaker::new("bench-admit".to_string(), CircuitBreakerConfig::default());
    c.bench_function("circuit_breaker_would_admit", |b| {
        b.to_async(&rt).iter(|| async { admit_breaker.would_admit().await });
    });

    let success_breaker =
        CircuitBreaker::new("bench-success".to_string(), CircuitBreakerConfig::default());
    c.bench_function("circuit_breaker_on_success", |b| {
        b.to_async(&rt).iter(|| async { success_breaker.on_success().await });
    });
}

fn bench_sse_parsing(c: &mut Criterion) {
    let frame = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n";

    c.bench_function("sse_parser_feed_openai_frame", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            black_box(parser.feed(frame));
        });
    });
}

criterion_group!(
    benches,
    bench_registry_lookup,
    bench_rate_limiter,
    bench_circuit_breaker,
    bench_sse_parsing
);
criterion_main!(benches);
