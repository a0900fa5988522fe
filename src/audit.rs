//! One structured audit event per terminated request.
//!
//! The schema matches `spec.md` §4.6 exactly (`schema_version`,
//! `timestamp`, `request_id`, `tenant`, `subject`, `method`, `path`,
//! `status_code`, `upstream`, `decision`, optional `reason`), which
//! supersedes `original_source/gateway/audit.py`'s older, incomplete
//! shape per `spec.md` §9. Emitted via `tracing::info!(target:
//! "audit", ...)` the way the teacher routes structured domain events
//! through `tracing` rather than a bespoke writer.

use serde::Serialize;

const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Error,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Error => "error",
        }
    }

    /// `allow` for `<400`, `deny` for `400-499`, `error` for `>=500`.
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            0..=399 => Decision::Allow,
            400..=499 => Decision::Deny,
            _ => Decision::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub schema_version: &'static str,
    pub timestamp: String,
    pub request_id: String,
    pub tenant: Option<String>,
    pub subject: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub upstream: String,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Fields known at the moment a request's outcome is final. Keeping
/// this separate from [`AuditEvent`] lets callers assemble it
/// incrementally over the lifetime of a request.
pub struct AuditRecord {
    pub request_id: String,
    pub tenant: Option<String>,
    pub subject: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub upstream: String,
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn into_event(self) -> AuditEvent {
        AuditEvent {
            schema_version: SCHEMA_VERSION,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: self.request_id,
            tenant: self.tenant,
            subject: self.subject,
            method: self.method,
            path: self.path,
            status_code: self.status_code,
            upstream: self.upstream,
            decision: Decision::from_status(self.status_code).as_str(),
            reason: self.reason,
        }
    }
}

/// Emits exactly one audit line for a terminated request. Callers
/// build an [`AuditRecord`] once the final status is known and pass it
/// here; this is the single place audit events reach `tracing`.
pub fn emit(record: AuditRecord) {
    let event = record.into_event();
    match serde_json::to_string(&event) {
        Ok(line) => tracing::info!(target: "audit", "{}", line),
        Err(error) => {
            tracing::error!(target: "audit", error = %error, "failed to serialize audit event")
        }
    }
}
