//! Role-based access control: maps validated claims to an effective role
//! and compares it against the route's required role.
//!
//! Grounded on `original_source/gateway/rbac.py`'s alias-map / role-level
//! shape, translated into an `Ord`-derived enum instead of an integer
//! lookup table, and extended per `spec.md` §4.2 with `*Mutation`
//! requiring `contributor` and `rbac_default_deny` requiring `admin` on
//! unclassified routes (both absent from the retrieved `rbac.py`, which
//! `spec.md` §9 identifies as the older, non-authoritative variant).

use crate::route::RouteKind;
use std::collections::HashMap;

/// The three built-in roles, totally ordered `Viewer < Contributor <
/// Admin` via the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Contributor,
    Admin,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Contributor => "contributor",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RbacError {
    #[error("Missing role claim(s): {0}")]
    MissingRoleClaims(String),

    #[error("No recognized roles found in claim(s): {0}")]
    NoRecognizedRoles(String),

    #[error("Insufficient role: required {required}, got {effective}")]
    InsufficientRole { required: Role, effective: Role },

    #[error("Insufficient role: default deny requires admin, got {effective}")]
    DefaultDenyRequiresAdmin { effective: Role },
}

/// Role-related settings pulled out of [`crate::config::GatewayConfig`]
/// so this module does not depend on the config type directly.
#[derive(Debug, Clone)]
pub struct RbacSettings<'a> {
    pub role_claim: &'a str,
    pub viewer_aliases: &'a str,
    pub contributor_aliases: &'a str,
    pub admin_aliases: &'a str,
    pub default_deny: bool,
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn build_alias_map(settings: &RbacSettings) -> HashMap<String, Role> {
    let mut map = HashMap::new();

    map.insert("viewer".to_string(), Role::Viewer);
    for alias in parse_csv(settings.viewer_aliases) {
        map.insert(alias, Role::Viewer);
    }

    map.insert("contributor".to_string(), Role::Contributor);
    for alias in parse_csv(settings.contributor_aliases) {
        map.insert(alias, Role::Contributor);
    }

    map.insert("admin".to_string(), Role::Admin);
    for alias in parse_csv(settings.admin_aliases) {
        map.insert(alias, Role::Admin);
    }

    map
}

fn role_claim_keys(role_claim: &str) -> Vec<String> {
    let parsed = parse_csv(role_claim);
    if parsed.is_empty() {
        vec!["roles".to_string()]
    } else {
        parsed
    }
}

fn collect_role_candidates(
    claims: &serde_json::Map<String, serde_json::Value>,
    role_claim_keys: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut candidates = Vec::new();
    let mut present_claims = Vec::new();

    for key in role_claim_keys {
        let Some(raw) = claims.get(key) else {
            continue;
        };
        present_claims.push(key.clone());

        match raw {
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    candidates.push(trimmed.to_string());
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    if let serde_json::Value::String(s) = item {
                        let trimmed = s.trim();
                        if !trimmed.is_empty() {
                            candidates.push(trimmed.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    (candidates, present_claims)
}

/// The required role for a given route kind, per `spec.md`'s table in
/// §4.2. Returns `None` for `Other` with default-deny off (no
/// requirement at all).
pub fn required_role_for_route(kind: RouteKind, default_deny: bool) -> Option<Role> {
    use RouteKind::*;
    match kind {
        RunsCreate | RegisteredModelCreate | ModelVersionCreate => Some(Role::Contributor),
        RunsMutation | RegisteredModelMutation | ModelVersionMutation => Some(Role::Contributor),
        RunsGet | RunsSearch | RegisteredModelGet | RegisteredModelsSearch | ModelVersionGet => {
            Some(Role::Viewer)
        }
        Other => {
            if default_deny {
                Some(Role::Admin)
            } else {
                None
            }
        }
    }
}

/// Resolves the effective (maximum) role from claims, per `spec.md`
/// §4.2 steps 1-4.
pub fn extract_effective_role(
    claims: &serde_json::Map<String, serde_json::Value>,
    settings: &RbacSettings,
) -> Result<Role, RbacError> {
    let claim_keys = role_claim_keys(settings.role_claim);
    let (candidates, present_claims) = collect_role_candidates(claims, &claim_keys);

    if present_claims.is_empty() {
        return Err(RbacError::MissingRoleClaims(claim_keys.join(", ")));
    }

    let alias_map = build_alias_map(settings);
    let mut effective: Option<Role> = None;

    for candidate in &candidates {
        if let Some(mapped) = alias_map.get(candidate.to_lowercase().as_str()) {
            effective = Some(match effective {
                Some(current) if current >= *mapped => current,
                _ => *mapped,
            });
        }
    }

    effective.ok_or_else(|| RbacError::NoRecognizedRoles(claim_keys.join(", ")))
}

/// Enforces RBAC for a request: computes the required role for the
/// route, and if one is required, the effective role from claims, and
/// compares. A route with no requirement (`Other`, default-deny off)
/// returns `Ok(())` without even requiring a role claim.
pub fn enforce(
    kind: RouteKind,
    claims: &serde_json::Map<String, serde_json::Value>,
    settings: &RbacSettings,
) -> Result<(), RbacError> {
    let Some(required) = required_role_for_route(kind, settings.default_deny) else {
        return Ok(());
    };

    let effective = extract_effective_role(claims, settings)?;

    if settings.default_deny && matches!(kind, RouteKind::Other) && effective < Role::Admin {
        return Err(RbacError::DefaultDenyRequiresAdmin { effective });
    }

    if effective < required {
        return Err(RbacError::InsufficientRole {
            required,
            effective,
        });
    }

    Ok(())
}
