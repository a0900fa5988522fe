//! Gateway error taxonomy and its HTTP/JSON wire representation.
//!
//! Mirrors the teacher's `core::error::error_types` pattern (a single
//! `thiserror`-derived enum with a `status_code()` mapping and an
//! `IntoResponse` impl) but serializes the `{"detail": ...}` body shape
//! this gateway's callers (MLflow SDK clients) actually expect, and
//! always echoes `X-Request-ID` on the way out.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Application error taxonomy, per the error handling design.
///
/// Each variant maps to exactly one HTTP status code and one audit
/// `upstream` label (`"auth"` for [`GatewayError::Authentication`],
/// `"policy"` for [`GatewayError::Authorization`] and
/// [`GatewayError::Validation`] raised before any upstream contact).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    Validation(String),

    /// `X-Tenant` present while OIDC auth is active. A 400, not a 401,
    /// but identity-related like an auth failure, so it is audited with
    /// the `"auth"` upstream label rather than `"policy"`.
    #[error("{0}")]
    TenantHeaderNotAllowed(String),

    #[error("upstream transport failure contacting {url}: {message}")]
    UpstreamTransport { url: String, message: String },

    #[error("upstream protocol failure contacting {url}: {message}")]
    UpstreamProtocol { url: String, message: String },

    /// A cross-tenant denial discovered only after the gateway already
    /// contacted `url` (a preflight GET or the forwarded request itself).
    /// Distinct from [`GatewayError::Authorization`], which covers
    /// denials raised before any upstream contact.
    #[error("{message}")]
    OwnershipDenied { url: String, message: String },

    #[error("upstream is unavailable")]
    UpstreamUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Authorization(_) => StatusCode::FORBIDDEN,
            GatewayError::OwnershipDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::TenantHeaderNotAllowed(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamProtocol { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `reason` recorded on the audit event for this error, when one
    /// applies (validation/internal/upstream errors carry a reason;
    /// plain authn/authz denials are usually self-explanatory from the
    /// status code alone, but we still surface the message).
    pub fn audit_reason(&self) -> Option<String> {
        match self {
            GatewayError::Internal(_) => Some("internal_error".to_string()),
            GatewayError::UpstreamTransport { .. } | GatewayError::UpstreamProtocol { .. } => {
                Some("upstream_server_error".to_string())
            }
            GatewayError::OwnershipDenied { message, .. } => Some(message.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The audit `upstream` label for this error. Per `spec.md` §4.6,
    /// `upstream` is the actual forwarded URL once contact was attempted
    /// (transport/protocol failures still name the URL they failed
    /// against), `"auth"` for identity failures, and `"policy"` for
    /// everything denied before any upstream contact was made.
    pub fn audit_upstream_label(&self) -> String {
        match self {
            GatewayError::Authentication(_) | GatewayError::TenantHeaderNotAllowed(_) => {
                "auth".to_string()
            }
            GatewayError::UpstreamTransport { url, .. }
            | GatewayError::UpstreamProtocol { url, .. }
            | GatewayError::OwnershipDenied { url, .. } => url.clone(),
            _ => "policy".to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn tenant_header_not_allowed(message: impl Into<String>) -> Self {
        Self::TenantHeaderNotAllowed(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    /// A cross-tenant denial discovered after the gateway already
    /// contacted `url` (preflight GET or the forwarded request itself).
    pub fn ownership_denied(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OwnershipDenied {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(status = %status.as_u16(), error = %self, "gateway error");
        } else {
            warn!(status = %status.as_u16(), error = %self, "request denied");
        }

        // Upstream transport/protocol failures carry the attempted URL in
        // their `Display`, which is logged above but must not reach the
        // caller: it would leak internal network topology to an external
        // MLflow SDK client.
        let detail = match &self {
            GatewayError::UpstreamUnavailable => "Upstream MLflow is unavailable".to_string(),
            GatewayError::Internal(_) => "Internal Server Error".to_string(),
            GatewayError::UpstreamTransport { .. } => {
                "Upstream MLflow request failed".to_string()
            }
            GatewayError::UpstreamProtocol { .. } => {
                "Upstream MLflow returned an invalid response".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorBody { detail })).into_response();
        // Request-id is attached by the request-id middleware which wraps
        // every handler, including this error path, so no header is set
        // here directly; see `proxy::request_id`.
        response
            .headers_mut()
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        response
    }
}
