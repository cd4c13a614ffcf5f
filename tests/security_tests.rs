use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jsonwebtoken::{encode, EncodingKey, Header};
use sentryroute::middleware::AuthMiddleware;
use sentryroute::security::{
    FallbackValidator, JwtValidator, RemoteTokenValidator, StaticTokenValidator, TokenValidator,
};
use sentryroute::{
    AuthError, DispatchRequest, Dispatcher, HandlerResponse, HandlerResult, Principal,
    RequestContext,
};
use serde_json::{json, Value};

const SECRET: &str = "integration-secret";

fn sign(claims: Value) -> String {
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn in_an_hour() -> u64 {
    jsonwebtoken::get_current_timestamp() + 3600
}

fn whoami(ctx: &RequestContext) -> HandlerResult {
    let p = ctx.identity();
    Ok(HandlerResponse::ok(json!({
        "sub": p.map(|p| p.subject.clone()),
        "scopes": p.map(|p| p.scopes.clone()),
    })))
}

fn dispatcher(validator: Arc<dyn TokenValidator>) -> Dispatcher {
    let mut d = Dispatcher::new();
    d.get("/api/whoami", whoami).unwrap();
    d.get("/public/status", whoami).unwrap();
    d.add_middleware(Arc::new(
        AuthMiddleware::new(validator).exclude_paths(&["/public/*"]).unwrap(),
    ));
    d
}

fn get(d: &Dispatcher, path: &str, token: Option<&str>) -> HandlerResponse {
    let mut req = DispatchRequest::new("GET", path);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    d.respond(req)
}

#[test]
fn test_jwt_end_to_end() {
    let validator = Arc::new(
        JwtValidator::hs256(SECRET)
            .issuer("sentry")
            .audience("dashboard")
            .with_cache(16),
    );
    let d = dispatcher(Arc::clone(&validator) as Arc<dyn TokenValidator>);

    let good = sign(json!({
        "sub": "analyst-3", "iss": "sentry", "aud": "dashboard",
        "exp": in_an_hour(), "scope": "intrusions:read"
    }));
    let res = get(&d, "/api/whoami", Some(&good));
    assert_eq!(res.status, 200);
    assert_eq!(res.body["sub"], "analyst-3");
    assert_eq!(res.body["scopes"], json!(["intrusions:read"]));

    // second call is served from the claims cache
    assert_eq!(get(&d, "/api/whoami", Some(&good)).status, 200);
    let stats = validator.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    let wrong_aud = sign(json!({ "sub": "a", "iss": "sentry", "aud": "billing", "exp": in_an_hour() }));
    assert_eq!(get(&d, "/api/whoami", Some(&wrong_aud)).status, 401);

    let expired = sign(json!({ "sub": "a", "iss": "sentry", "aud": "dashboard", "exp": 1_000 }));
    assert_eq!(get(&d, "/api/whoami", Some(&expired)).status, 401);

    assert_eq!(get(&d, "/api/whoami", None).status, 401);

    let res = get(&d, "/public/status", None);
    assert_eq!(res.status, 200);
    assert_eq!(res.body["sub"], Value::Null);
}

#[test]
fn test_fallback_prefers_static_tokens_then_jwt() {
    let validator = FallbackValidator::new()
        .with(Arc::new(
            StaticTokenValidator::new().with_token("svc-ingest", Principal::new("ingest-bot")),
        ))
        .with(Arc::new(JwtValidator::hs256(SECRET)));
    let d = dispatcher(Arc::new(validator));

    assert_eq!(get(&d, "/api/whoami", Some("svc-ingest")).body["sub"], "ingest-bot");
    let jwt = sign(json!({ "sub": "analyst-9", "exp": in_an_hour() }));
    assert_eq!(get(&d, "/api/whoami", Some(&jwt)).body["sub"], "analyst-9");
    assert_eq!(get(&d, "/api/whoami", Some("nope")).status, 401);
}

#[test]
fn test_slow_verifier_is_rejected_not_awaited() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let conn = listener.accept();
        thread::sleep(Duration::from_secs(5));
        drop(conn);
    });

    let remote = RemoteTokenValidator::new(format!("http://{addr}/verify"))
        .timeout(Duration::from_millis(200));
    assert_eq!(remote.verify_url(), format!("http://{addr}/verify"));
    let d = dispatcher(Arc::new(remote));

    let start = Instant::now();
    let res = get(&d, "/api/whoami", Some("any-token"));
    assert_eq!(res.status, 401);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_validator_closures_plug_in() {
    let d = dispatcher(Arc::new(|token: &str| {
        token
            .strip_prefix("user:")
            .map(Principal::new)
            .ok_or(AuthError::InvalidToken("expected user:<name>".to_string()))
    }));
    assert_eq!(get(&d, "/api/whoami", Some("user:carol")).body["sub"], "carol");
    assert_eq!(get(&d, "/api/whoami", Some("carol")).status, 401);
}
