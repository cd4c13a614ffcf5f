use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;
use jsonwebtoken::{encode, EncodingKey, Header};
use sentryroute::middleware::{
    AuthMiddleware, Quota, RateLimitMiddleware, RateLimitStore, SanitizeMiddleware,
    SecurityMiddleware, TokenBucketStore,
};
use sentryroute::router::RouteTable;
use sentryroute::security::{JwtValidator, StaticTokenValidator, TokenValidator};
use sentryroute::{DispatchRequest, Dispatcher, HandlerResponse, HandlerResult, Principal, RequestContext};
use serde_json::json;

const PATTERNS: &[(&str, &str)] = &[
    ("GET", "/"),
    ("GET", "/api/intrusions"),
    ("POST", "/api/intrusions"),
    ("GET", "/api/intrusions/{id}"),
    ("PUT", "/api/intrusions/{id}"),
    ("DELETE", "/api/intrusions/{id}"),
    ("GET", "/api/intrusions/{id}/risk"),
    ("GET", "/api/scans/{scan}/hosts/{host}/ports/{port}"),
    ("GET", "/api/tenants/{t}/sites/{s}/sensors/{sensor}/alerts/{alert}/notes/{note}"),
    ("GET", "/api/dashboard/stats"),
];

fn ok(_: &RequestContext) -> HandlerResult {
    Ok(HandlerResponse::ok(json!({ "ok": true })))
}

fn table() -> RouteTable {
    let mut table = RouteTable::new();
    for (method, pattern) in PATTERNS {
        let method = Method::from_bytes(method.as_bytes()).unwrap();
        table.register(method, pattern, ok).unwrap();
    }
    table
}

fn bench_route_match(c: &mut Criterion) {
    let table = table();
    let paths = [
        (Method::GET, "/api/intrusions/123"),
        (Method::GET, "/api/intrusions/123/risk"),
        (Method::GET, "/api/scans/9/hosts/10.0.0.4/ports/443"),
        (Method::GET, "/api/tenants/a/sites/b/sensors/c/alerts/d/notes/e"),
        (Method::PATCH, "/api/intrusions/123"),
        (Method::GET, "/api/unknown"),
    ];
    c.bench_function("route_match", |b| {
        b.iter(|| {
            for (method, path) in &paths {
                black_box(table.resolve(method, black_box(path)));
            }
        })
    });
}

fn bench_dispatch_stack(c: &mut Criterion) {
    let mut bare = Dispatcher::new();
    bare.get("/api/intrusions/{id}", ok).unwrap();

    let mut stacked = Dispatcher::new();
    stacked.get("/api/intrusions/{id}", ok).unwrap();
    let tokens = StaticTokenValidator::new().with_token("bench-token", Principal::new("bench"));
    stacked
        .add_middleware(Arc::new(SecurityMiddleware::new()))
        .add_middleware(Arc::new(AuthMiddleware::new(Arc::new(tokens))))
        .add_middleware(Arc::new(SanitizeMiddleware::new()));

    let mut group = c.benchmark_group("dispatch");
    for (name, d) in [("bare", &bare), ("security_auth_sanitize", &stacked)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let req = DispatchRequest::new("GET", "/api/intrusions/42?verbose=1")
                    .header("Authorization", "Bearer bench-token");
                black_box(d.respond(req))
            })
        });
    }
    group.finish();
}

fn bench_rate_limit_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limit_store");
    group.sample_size(10);
    let quota = Quota::new(u32::MAX, 1_000_000.0).unwrap();

    for num_threads in [1usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("same_key", num_threads), &num_threads, |b, &n| {
            b.iter(|| {
                let store = Arc::new(TokenBucketStore::new());
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let store = Arc::clone(&store);
                        thread::spawn(move || {
                            for _ in 0..1000 {
                                black_box(store.acquire("203.0.113.5", &quota, Instant::now()));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("distinct_keys", num_threads), &num_threads, |b, &n| {
            b.iter(|| {
                let store = Arc::new(TokenBucketStore::new());
                let handles: Vec<_> = (0..n)
                    .map(|t| {
                        let store = Arc::clone(&store);
                        thread::spawn(move || {
                            let key = format!("client-{t}");
                            for _ in 0..1000 {
                                black_box(store.acquire(&key, &quota, Instant::now()));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            })
        });
    }
    group.finish();

    let mut d = Dispatcher::new();
    d.get("/api/dashboard/stats", ok).unwrap();
    d.add_middleware(Arc::new(RateLimitMiddleware::new(quota)));
    c.bench_function("dispatch_rate_limited", |b| {
        b.iter(|| black_box(d.respond(DispatchRequest::new("GET", "/api/dashboard/stats").remote_addr("10.0.0.1"))))
    });
}

fn bench_jwt_cache(c: &mut Criterion) {
    let secret = "bench-secret";
    let token = encode(
        &Header::default(),
        &json!({ "sub": "analyst", "exp": jsonwebtoken::get_current_timestamp() + 3600 }),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap();

    let mut group = c.benchmark_group("jwt_validate");
    let uncached = JwtValidator::hs256(secret);
    let cached = JwtValidator::hs256(secret).with_cache(1024);
    group.bench_function("uncached", |b| b.iter(|| black_box(uncached.validate(black_box(&token)))));
    group.bench_function("cached", |b| b.iter(|| black_box(cached.validate(black_box(&token)))));
    group.finish();
}

criterion_group!(
    benches,
    bench_route_match,
    bench_dispatch_stack,
    bench_rate_limit_contention,
    bench_jwt_cache
);
criterion_main!(benches);
