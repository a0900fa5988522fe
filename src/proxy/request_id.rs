//! Request-ID middleware: assigns or propagates a request identifier
//! and guarantees it lands on every outgoing response, success or
//! error path alike.
//!
//! Grounded on the request-id middleware shape found in the example
//! pack's `quarlus-core::request_id` plugin (generate-or-propagate,
//! stash as a request extension, copy onto the response header),
//! adapted to a plain `axum::middleware::from_fn` since this gateway
//! has no plugin/builder system of its own.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// The request id assigned to this request, stashed as an extension so
/// handlers and the audit emitter can read it back.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }

    response
}
