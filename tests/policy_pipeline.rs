//! End-to-end tests driving the built router through `tower::ServiceExt`,
//! with the upstream MLflow backend mocked via `wiremock`. Mirrors the
//! literal scenarios worked out against `original_source`'s
//! `test_runs_tenant_policy.py` / `test_registry_tenant_policy.py` /
//! `test_jwt.py`, grounded on the auth-service's `jwks_loadshed.rs` test
//! for RSA-signed-JWT setup against an inline JWKS.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use mlflow_policy_gateway::config::GatewayConfig;
use mlflow_policy_gateway::proxy::{self, AppState};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    tenant_id: &'a str,
    roles: &'a [&'a str],
    exp: i64,
    iat: i64,
    nbf: i64,
}

struct SignedToken {
    token: String,
    jwks_json: String,
}

fn sign_token(kid: &str, tenant: &str, roles: &[&str]) -> SignedToken {
    let mut rng = rsa::rand_core::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public_key = rsa::RsaPublicKey::from(&private_key);
    let modulus = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let exponent = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    let pem = private_key
        .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
        .unwrap();

    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: "user-1",
        tenant_id: tenant,
        roles,
        exp: now + 3600,
        iat: now,
        nbf: now - 10,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    let token = encode(&header, &claims, &encoding_key).unwrap();

    let jwks_json = json!({
        "keys": [{
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": modulus,
            "e": exponent,
        }]
    })
    .to_string();

    SignedToken { token, jwks_json }
}

fn off_mode_config(upstream_base: &str) -> GatewayConfig {
    GatewayConfig {
        target_base_url: upstream_base.to_string(),
        auth_enabled: false,
        auth_mode: "off".to_string(),
        ..GatewayConfig::default()
    }
}

fn oidc_config(upstream_base: &str, jwks_json: &str) -> GatewayConfig {
    GatewayConfig {
        target_base_url: upstream_base.to_string(),
        auth_enabled: true,
        auth_mode: "oidc".to_string(),
        jwks_json: Some(jwks_json.to_string()),
        ..GatewayConfig::default()
    }
}

fn router_for(config: GatewayConfig) -> Router {
    proxy::build_router(AppState::new(config).unwrap())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn create_run_injects_tenant_tag() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/create"))
        .and(body_partial_json(json!({
            "tags": [
                {"key": "project", "value": "demo"},
                {"key": "tenant", "value": "tenant-a"},
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run": {}})))
        .mount(&upstream)
        .await;

    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/create")
        .header("x-tenant", "tenant-a")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"experiment_id": "1", "tags": [{"key": "project", "value": "demo"}]})
                .to_string(),
        ))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn create_run_with_conflicting_tenant_tag_is_rejected_before_upstream() {
    let upstream = MockServer::start().await;
    // No mock mounted: any forwarded request would fail the test via a 404 from wiremock.

    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/create")
        .header("x-tenant", "tenant-a")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"tags": [{"key": "tenant", "value": "other-tenant"}]}).to_string(),
        ))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn search_appends_tenant_filter_clause() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/search"))
        .and(body_partial_json(json!({
            "filter": "(attributes.status = 'RUNNING') and tags.tenant = 'tenant-a'"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .mount(&upstream)
        .await;

    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/search")
        .header("x-tenant", "tenant-a")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"filter": "attributes.status = 'RUNNING'"}).to_string(),
        ))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn get_run_denies_cross_tenant_response() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run": {"data": {"tags": [{"key": "tenant", "value": "tenant-b"}]}}
        })))
        .mount(&upstream)
        .await;

    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/get")
        .header("x-tenant", "tenant-a")
        .header("content-type", "application/json")
        .body(Body::from(json!({"run_id": "r1"}).to_string()))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mutation_preflight_denies_cross_tenant_resource() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run": {"data": {"tags": [{"key": "tenant", "value": "tenant-b"}]}}
        })))
        .mount(&upstream)
        .await;
    // No mock for log-batch: if the preflight fails to short-circuit,
    // wiremock will 404 and the assertion below still fails (not 403),
    // making a leak visible either way.

    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/log-batch")
        .header("x-tenant", "tenant-a")
        .header("content-type", "application/json")
        .body(Body::from(json!({"run_id": "r1", "metrics": []}).to_string()))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oidc_mode_rejects_x_tenant_header() {
    let upstream = MockServer::start().await;
    let signed = sign_token("kid-1", "team-a", &["viewer"]);

    let router = router_for(oidc_config(&upstream.uri(), &signed.jwks_json));
    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/search")
        .header("authorization", format!("Bearer {}", signed.token))
        .header("x-tenant", "team-a")
        .header("content-type", "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oidc_authentication_succeeds_with_a_matching_kid() {
    // The force-refresh-exactly-once behavior on a genuine kid miss is
    // covered directly against a live JWKS_URI by
    // `auth::jwks::tests::kid_miss_triggers_exactly_one_force_refresh`;
    // this test exercises the rest of the pipeline once a key matches.
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .mount(&upstream)
        .await;

    let signed = sign_token("kid-present", "team-a", &["viewer"]);
    let router = router_for(oidc_config(&upstream.uri(), &signed.jwks_json));

    let request = Request::builder()
        .method("POST")
        .uri("/api/2.0/mlflow/runs/search")
        .header("authorization", format!("Bearer {}", signed.token))
        .header("content-type", "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn readyz_returns_503_when_upstream_is_down() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;

    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("GET")
        .uri("/readyz")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({"detail": "Upstream MLflow is unavailable"}));
}

#[tokio::test]
async fn healthz_is_unauthenticated_and_always_ok() {
    let upstream = MockServer::start().await;
    let router = router_for(oidc_config(&upstream.uri(), "{\"keys\":[]}"));
    let request = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn every_response_carries_a_request_id_header() {
    let upstream = MockServer::start().await;
    let router = router_for(off_mode_config(&upstream.uri()));
    let request = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert!(response.headers().get("x-request-id").is_some());
}
