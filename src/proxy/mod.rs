//! Proxy Core: the request pipeline that ties authentication, RBAC,
//! tenant rewriting and audit emission together, then forwards to the
//! upstream MLflow-compatible backend.
//!
//! Grounded on the teacher's `core::router::app_router` (shared
//! `AppState`, `Router` construction, `TraceLayer` wiring via
//! `ServiceBuilder`) generalized from Navius's many-subsystem state to
//! the gateway's three pieces of shared state: HTTP client, config,
//! JWKS cache.

pub mod request_id;

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{Router, any, get};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{self, AuditRecord};
use crate::auth::{JwksCache, JwtValidatorSettings};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::rbac::{self, RbacSettings};
use crate::route::{self, RouteKind};
use crate::tenant;
use request_id::RequestId;

const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared, read-mostly state behind every handler: the config snapshot,
/// the outbound HTTP client (built once, reused for every proxied call,
/// preflight, and readiness probe), and the JWKS cache when auth is on.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub http: reqwest::Client,
    pub jwks: Option<Arc<JwksCache>>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {e}")))?;

        let jwks = if config.auth_is_enabled() {
            Some(Arc::new(JwksCache::new(
                config.jwks_uri.clone(),
                config.jwks_json.clone(),
                http.clone(),
            )?))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            http,
            jwks,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback(any(proxy_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(middleware::from_fn(request_id::assign_request_id))
                .layer(TraceLayer::new_for_http()),
        )
}

fn request_id_of(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "-".to_string())
}

async fn healthz(request: Request) -> impl IntoResponse {
    audit::emit(AuditRecord {
        request_id: request_id_of(&request),
        tenant: None,
        subject: None,
        method: "GET".to_string(),
        path: "/healthz".to_string(),
        status_code: 200,
        upstream: "policy".to_string(),
        reason: None,
    });
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readyz(State(state): State<AppState>, request: Request) -> impl IntoResponse {
    let outcome = state
        .http
        .get(&state.config.target_base_url)
        .timeout(state.config.readiness_timeout())
        .send()
        .await;

    let status_code = match &outcome {
        Ok(response) if !response.status().is_server_error() => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    audit::emit(AuditRecord {
        request_id: request_id_of(&request),
        tenant: None,
        subject: None,
        method: "GET".to_string(),
        path: "/readyz".to_string(),
        status_code: status_code.as_u16(),
        upstream: state.config.target_base_url.clone(),
        reason: None,
    });

    if status_code == StatusCode::OK {
        (status_code, Json(serde_json::json!({ "status": "ready" }))).into_response()
    } else {
        GatewayError::UpstreamUnavailable.into_response()
    }
}

/// Identity resolved for a single request, independent of whether it
/// came from a bearer token or the off-mode headers.
struct Identity {
    tenant: String,
    subject: Option<String>,
    claims: serde_json::Map<String, Value>,
}

async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity> {
    let config = &*state.config;

    if config.auth_is_enabled() {
        if headers.contains_key("x-tenant") {
            return Err(GatewayError::tenant_header_not_allowed(
                "X-Tenant header is not allowed when AUTH_MODE=oidc",
            ));
        }

        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| GatewayError::unauthorized("missing bearer token"))?;

        let jwks = state
            .jwks
            .as_ref()
            .ok_or_else(|| GatewayError::internal("auth is enabled but JWKS cache is absent"))?;

        let settings = JwtValidatorSettings {
            issuer: config.oidc_issuer.as_deref(),
            audience: config.oidc_audience.as_deref(),
            algorithms: &config.oidc_algorithms,
        };
        let claims = crate::auth::validate(bearer, jwks, &settings).await?;

        let tenant = claims
            .get(&config.tenant_claim)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::unauthorized(format!(
                    "token is missing tenant claim '{}'",
                    config.tenant_claim
                ))
            })?
            .to_string();

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        Ok(Identity {
            tenant,
            subject,
            claims,
        })
    } else {
        let tenant = headers
            .get("x-tenant")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| GatewayError::unauthorized("missing X-Tenant header"))?
            .to_string();

        let subject = headers
            .get("x-subject")
            .and_then(|value| value.to_str().ok())
            .map(|s| s.to_string());

        if headers.contains_key(axum::http::header::AUTHORIZATION) {
            tracing::warn!("stripping inbound Authorization header: auth is disabled");
        }

        Ok(Identity {
            tenant,
            subject,
            claims: serde_json::Map::new(),
        })
    }
}

const FORWARD_STRIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "x-tenant",
    "x-subject",
    "authorization",
];

const STRIP_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "connection",
    "content-length",
];

fn filtered_forward_headers(headers: &HeaderMap, auth_enabled: bool) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "authorization" && auth_enabled {
            out.insert(name.clone(), value.clone());
            continue;
        }
        if FORWARD_STRIP_REQUEST_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}

fn strip_response_headers(headers: &mut HeaderMap) {
    for name in STRIP_RESPONSE_HEADERS {
        headers.remove(*name);
    }
}

/// The single catch-all handler: implements the request flow from
/// `spec.md` §4.5 steps 2-7 (step 1, request-id assignment, happens in
/// the `request_id` middleware layered around this handler).
async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "-".to_string());
    let headers = request.headers().clone();

    let result = handle_proxied_request(&state, &method, &uri, headers, request).await;

    let (response, audit_record) = match result {
        Ok((response, record)) => (response, record),
        Err(error) => {
            let status = error.status_code();
            let record = AuditRecord {
                request_id: request_id.clone(),
                tenant: None,
                subject: None,
                method: method.to_string(),
                path: path.clone(),
                status_code: status.as_u16(),
                upstream: error.audit_upstream_label(),
                reason: error.audit_reason(),
            };
            (error.into_response(), record)
        }
    };

    audit::emit(audit_record);
    response
}

async fn handle_proxied_request(
    state: &AppState,
    method: &Method,
    uri: &axum::http::Uri,
    headers: HeaderMap,
    request: Request,
) -> Result<(Response, AuditRecord)> {
    let path = uri.path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "-".to_string());

    let identity = resolve_identity(state, &headers).await?;

    let kind = route::classify(&path);

    // RBAC is only meaningful against token claims; auth-off mode has
    // no claims to enforce against, so it is skipped entirely, as in
    // the authoritative gateway handler this is modeled on.
    if state.config.auth_is_enabled() {
        let rbac_settings = RbacSettings {
            role_claim: &state.config.role_claim,
            viewer_aliases: &state.config.rbac_viewer_aliases,
            contributor_aliases: &state.config.rbac_contributor_aliases,
            admin_aliases: &state.config.rbac_admin_aliases,
            default_deny: state.config.rbac_default_deny,
        };
        rbac::enforce(kind, &identity.claims, &rbac_settings)
            .map_err(|e| GatewayError::forbidden(e.to_string()))?;
    }

    let body_bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::bad_request(format!("failed to read request body: {e}")))?;

    let rewritten_body = rewrite_request_body(&body_bytes, kind, &state.config, &identity.tenant)?;

    if is_preflight_mutation(kind) {
        let mutation_body: Value = serde_json::from_slice(&body_bytes)
            .map_err(|e| GatewayError::bad_request(format!("invalid JSON body: {e}")))?;
        run_preflight(state, uri, kind, &headers, &mutation_body, &identity).await?;
    }

    let outgoing_body = match &rewritten_body {
        Some(value) => serde_json::to_vec(value)
            .map_err(|e| GatewayError::internal(format!("failed to serialize request body: {e}")))?,
        None => body_bytes.to_vec(),
    };

    let upstream_url = upstream_url(&state.config.target_base_url, uri)?;
    let forward_headers = filtered_forward_headers(&headers, state.config.auth_is_enabled());

    let upstream_response = send_upstream(
        &state.http,
        method.clone(),
        upstream_url.clone(),
        forward_headers,
        outgoing_body,
    )
    .await?;

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    let response_bytes = upstream_response.bytes().await.map_err(|e| {
        GatewayError::UpstreamTransport {
            url: upstream_url.clone(),
            message: e.to_string(),
        }
    })?;

    if needs_response_preflight(kind) && status.is_success() {
        enforce_response_ownership(
            &response_bytes,
            kind,
            &state.config,
            &identity.tenant,
            &upstream_url,
        )?;
    }

    strip_response_headers(&mut response_headers);

    let mut response = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        response = response.header(name, value);
    }
    let response = response
        .body(Body::from(response_bytes))
        .map_err(|e| GatewayError::internal(format!("failed to build response: {e}")))?;

    let record = AuditRecord {
        request_id,
        tenant: Some(identity.tenant),
        subject: identity.subject,
        method: method.to_string(),
        path,
        status_code: status.as_u16(),
        upstream: upstream_url,
        reason: None,
    };

    Ok((response, record))
}

fn rewrite_request_body(
    body_bytes: &[u8],
    kind: RouteKind,
    config: &GatewayConfig,
    tenant_id: &str,
) -> Result<Option<Value>> {
    let needs_rewrite = matches!(
        kind,
        RouteKind::RunsCreate
            | RouteKind::RegisteredModelCreate
            | RouteKind::ModelVersionCreate
            | RouteKind::RunsSearch
            | RouteKind::RegisteredModelsSearch
    );
    if !needs_rewrite {
        return Ok(None);
    }
    let mut body: Value = if body_bytes.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(body_bytes)
            .map_err(|e| GatewayError::bad_request(format!("invalid JSON body: {e}")))?
    };

    match kind {
        RouteKind::RunsCreate | RouteKind::RegisteredModelCreate | RouteKind::ModelVersionCreate => {
            tenant::inject_tenant_tag(&mut body, &config.tenant_tag_key, tenant_id)
                .map_err(map_tenant_error)?;
        }
        RouteKind::RunsSearch => {
            tenant::rewrite_search_filter(&mut body, "filter", &config.tenant_tag_key, tenant_id)
                .map_err(map_tenant_error)?;
        }
        RouteKind::RegisteredModelsSearch => {
            tenant::rewrite_search_filter(
                &mut body,
                "filter_string",
                &config.tenant_tag_key,
                tenant_id,
            )
            .map_err(map_tenant_error)?;
        }
        _ => unreachable!(),
    }

    Ok(Some(body))
}

fn map_tenant_error(error: tenant::TenantError) -> GatewayError {
    match error {
        tenant::TenantError::TenantConflict => GatewayError::forbidden(error.to_string()),
        other => GatewayError::bad_request(other.to_string()),
    }
}

fn is_preflight_mutation(kind: RouteKind) -> bool {
    matches!(
        kind,
        RouteKind::RunsMutation | RouteKind::RegisteredModelMutation | RouteKind::ModelVersionMutation
    )
}

fn needs_response_preflight(kind: RouteKind) -> bool {
    matches!(
        kind,
        RouteKind::RunsGet | RouteKind::RegisteredModelGet | RouteKind::ModelVersionGet
    )
}

async fn run_preflight(
    state: &AppState,
    uri: &axum::http::Uri,
    kind: RouteKind,
    headers: &HeaderMap,
    mutation_body: &Value,
    identity: &Identity,
) -> Result<()> {
    let preflight_path = route::preflight_get_path_for(uri.path(), kind)
        .ok_or_else(|| GatewayError::internal("mutation route has no preflight path"))?;
    let preflight_body = tenant::preflight_request_body(kind, mutation_body)
        .ok_or_else(|| GatewayError::bad_request("mutation body is missing the resource identifier"))?;

    let preflight_url = format!(
        "{}{}",
        state.config.target_base_url.trim_end_matches('/'),
        preflight_path
    );
    let forward_headers = filtered_forward_headers(headers, state.config.auth_is_enabled());
    let body_bytes = serde_json::to_vec(&preflight_body)
        .map_err(|e| GatewayError::internal(format!("failed to serialize preflight body: {e}")))?;

    let response = send_upstream(
        &state.http,
        Method::POST,
        preflight_url.clone(),
        forward_headers,
        body_bytes,
    )
    .await?;

    if !response.status().is_success() {
        return Err(GatewayError::ownership_denied(
            preflight_url,
            "preflight ownership check failed",
        ));
    }

    let bytes = response.bytes().await.map_err(|e| GatewayError::UpstreamTransport {
        url: preflight_url.clone(),
        message: e.to_string(),
    })?;
    let body: Value = serde_json::from_slice(&bytes).map_err(|e| GatewayError::UpstreamProtocol {
        url: preflight_url.clone(),
        message: format!("invalid preflight response JSON: {e}"),
    })?;

    let owner = tenant::extract_response_tenant(&body, owner_lookup_kind(kind), &state.config.tenant_tag_key);
    if owner.as_deref() != Some(identity.tenant.as_str()) {
        return Err(GatewayError::ownership_denied(
            preflight_url,
            "resource does not belong to the caller's tenant",
        ));
    }

    Ok(())
}

fn enforce_response_ownership(
    response_bytes: &[u8],
    kind: RouteKind,
    config: &GatewayConfig,
    tenant_id: &str,
    upstream_url: &str,
) -> Result<()> {
    let body: Value = serde_json::from_slice(response_bytes).map_err(|e| GatewayError::UpstreamProtocol {
        url: upstream_url.to_string(),
        message: format!("invalid upstream response JSON: {e}"),
    })?;
    let owner = tenant::extract_response_tenant(&body, kind, &config.tenant_tag_key);
    if owner.as_deref() != Some(tenant_id) {
        return Err(GatewayError::ownership_denied(
            upstream_url,
            "resource does not belong to the caller's tenant",
        ));
    }
    Ok(())
}

/// The corresponding `*Get` route kind for a `*Mutation` kind, since
/// [`tenant::extract_response_tenant`] keys its nested-path table on
/// the response shape, which is identical between a resource's `get`
/// and the preflight's `get`-equivalent call.
fn owner_lookup_kind(mutation_kind: RouteKind) -> RouteKind {
    match mutation_kind {
        RouteKind::RunsMutation => RouteKind::RunsGet,
        RouteKind::RegisteredModelMutation => RouteKind::RegisteredModelGet,
        RouteKind::ModelVersionMutation => RouteKind::ModelVersionGet,
        other => other,
    }
}

fn upstream_url(base: &str, uri: &axum::http::Uri) -> Result<String> {
    let base = base.trim_end_matches('/');
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path());
    Ok(format!("{}{}", base, path_and_query))
}

async fn send_upstream(
    client: &reqwest::Client,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Vec<u8>,
) -> Result<reqwest::Response> {
    client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamTransport {
            url,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_request_body_treats_empty_body_as_empty_object() {
        let config = GatewayConfig::default();
        let body = rewrite_request_body(&[], RouteKind::RunsCreate, &config, "tenant-a")
            .unwrap()
            .unwrap();
        let tags = body["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["key"], "tenant");
        assert_eq!(tags[0]["value"], "tenant-a");
    }

    #[test]
    fn filtered_forward_headers_drops_hop_and_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("gateway"));
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("x-tenant", HeaderValue::from_static("tenant-a"));
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        headers.insert("x-custom", HeaderValue::from_static("keep-me"));

        let filtered = filtered_forward_headers(&headers, false);
        assert!(filtered.get("host").is_none());
        assert!(filtered.get("content-length").is_none());
        assert!(filtered.get("x-tenant").is_none());
        assert!(filtered.get(axum::http::header::AUTHORIZATION).is_none());
        assert_eq!(filtered.get("x-custom").unwrap(), "keep-me");
    }

    #[test]
    fn filtered_forward_headers_keeps_authorization_when_auth_enabled() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        let filtered = filtered_forward_headers(&headers, true);
        assert_eq!(
            filtered.get(axum::http::header::AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn strip_response_headers_removes_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        strip_response_headers(&mut headers);
        assert!(headers.get("content-encoding").is_none());
        assert!(headers.get("content-type").is_some());
    }

    #[test]
    fn upstream_url_joins_base_and_path_and_query() {
        let uri: axum::http::Uri = "/api/2.0/mlflow/runs/search?x=1".parse().unwrap();
        assert_eq!(
            upstream_url("http://mlflow:5000/", &uri).unwrap(),
            "http://mlflow:5000/api/2.0/mlflow/runs/search?x=1"
        );
    }
}
