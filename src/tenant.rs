//! Request-body rewriting and response inspection that enforce tenant
//! isolation: tag injection on create, filter-clause appending on
//! search, tag extraction for the preflight checks on get/mutation.
//!
//! Grounded on `original_source/gateway/mlflow/tenant.py`, which carries
//! the same normalization/injection/filter/extractor shape; this module
//! collapses its per-resource functions into one set generic over the
//! resource's JSON field names.

use crate::route::RouteKind;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tags must be a list of objects, a mapping, or absent")]
    InvalidTagsShape,

    #[error("tag entry must be an object with string key/value")]
    InvalidTagEntry,

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("tenant tag conflict: resource already tagged for another tenant")]
    TenantConflict,

    #[error("filter field must be a string")]
    InvalidFilter,
}

/// One normalized `{key, value}` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Normalizes the `tags` field of a request/response payload into a
/// flat `Vec<Tag>`. Accepts the field being absent (empty list), a list
/// of `{key, value}` objects, or a mapping of key to value.
pub fn normalize_tags(tags_value: Option<&Value>) -> Result<Vec<Tag>, TenantError> {
    let Some(value) = tags_value else {
        return Ok(Vec::new());
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let obj = item.as_object().ok_or(TenantError::InvalidTagEntry)?;
                tag_from_object(obj)
            })
            .collect(),
        Value::Object(map) => Ok(map
            .iter()
            .filter_map(|(key, value)| {
                value.as_str().map(|value| Tag {
                    key: key.clone(),
                    value: value.to_string(),
                })
            })
            .collect()),
        _ => Err(TenantError::InvalidTagsShape),
    }
}

fn tag_from_object(obj: &Map<String, Value>) -> Result<Tag, TenantError> {
    let key = obj
        .get("key")
        .and_then(Value::as_str)
        .ok_or(TenantError::InvalidTagEntry)?;
    let value = obj
        .get("value")
        .and_then(Value::as_str)
        .ok_or(TenantError::InvalidTagEntry)?;
    Ok(Tag {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn tags_to_json(tags: &[Tag]) -> Value {
    Value::Array(
        tags.iter()
            .map(|tag| {
                serde_json::json!({
                    "key": tag.key,
                    "value": tag.value,
                })
            })
            .collect(),
    )
}

/// Ensures the body's normalized tag list carries `(tenant_tag_key,
/// tenant)`, rejecting a body that already carries the key with a
/// different value. Mutates `body["tags"]` in place to the normalized
/// array form.
pub fn inject_tenant_tag(
    body: &mut Value,
    tenant_tag_key: &str,
    tenant: &str,
) -> Result<(), TenantError> {
    let object = body.as_object_mut().ok_or(TenantError::NotAnObject)?;
    let mut tags = normalize_tags(object.get("tags"))?;

    match tags.iter().find(|tag| tag.key == tenant_tag_key) {
        Some(existing) if existing.value == tenant => {}
        Some(_) => return Err(TenantError::TenantConflict),
        None => tags.push(Tag {
            key: tenant_tag_key.to_string(),
            value: tenant.to_string(),
        }),
    }

    object.insert("tags".to_string(), tags_to_json(&tags));
    Ok(())
}

/// Escapes a tenant value for inclusion in the upstream's SQL-ish
/// filter grammar: doubles embedded single quotes. No richer escaping
/// or parsing is attempted; the upstream's filter language is out of
/// scope here.
fn escape_filter_value(value: &str) -> String {
    value.replace('\'', "''")
}

fn tenant_filter_clause(tenant_tag_key: &str, tenant: &str) -> String {
    format!(
        "tags.{} = '{}'",
        tenant_tag_key,
        escape_filter_value(tenant)
    )
}

/// Appends the tenant filter clause to an existing filter string,
/// per `spec.md` §4.4:
/// - empty/absent original → just the clause
/// - clause already a substring of the original → original, trimmed, unchanged
/// - otherwise → `(original trimmed) and clause`
pub fn append_tenant_filter(
    existing_filter: Option<&str>,
    tenant_tag_key: &str,
    tenant: &str,
) -> String {
    let clause = tenant_filter_clause(tenant_tag_key, tenant);
    let trimmed = existing_filter.unwrap_or("").trim();

    if trimmed.is_empty() {
        clause
    } else if trimmed.contains(&clause) {
        trimmed.to_string()
    } else {
        format!("({}) and {}", trimmed, clause)
    }
}

/// Rewrites a search request body's filter field (`filter` for runs,
/// `filter_string` for registered models) in place, appending the
/// tenant clause.
pub fn rewrite_search_filter(
    body: &mut Value,
    filter_field: &str,
    tenant_tag_key: &str,
    tenant: &str,
) -> Result<(), TenantError> {
    let object = body.as_object_mut().ok_or(TenantError::NotAnObject)?;
    let existing = match object.get(filter_field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(TenantError::InvalidFilter),
    };
    let rewritten = append_tenant_filter(existing, tenant_tag_key, tenant);
    object.insert(filter_field.to_string(), Value::String(rewritten));
    Ok(())
}

/// The JSON pointer path (dot-separated, array-free) to the nested
/// `tags` field for each resource's response envelope, per `spec.md`
/// §4.4: `run.data.tags`, `registered_model.tags`, `model_version.tags`.
fn tags_pointer_for(kind: RouteKind) -> Option<&'static [&'static str]> {
    use RouteKind::*;
    match kind {
        RunsGet | RunsMutation => Some(&["run", "data", "tags"]),
        RegisteredModelGet | RegisteredModelMutation => Some(&["registered_model", "tags"]),
        ModelVersionGet | ModelVersionMutation => Some(&["model_version", "tags"]),
        _ => None,
    }
}

/// Extracts the tenant tag's value from a resource response/body for
/// the given route kind. Returns `None` when the tag is absent or the
/// expected nested structure is missing — both treated by callers as
/// "not this tenant".
pub fn extract_response_tenant(body: &Value, kind: RouteKind, tenant_tag_key: &str) -> Option<String> {
    let path = tags_pointer_for(kind)?;
    let mut cursor = body;
    for segment in path {
        cursor = cursor.get(segment)?;
    }
    let tags = normalize_tags(Some(cursor)).ok()?;
    tags.into_iter()
        .find(|tag| tag.key == tenant_tag_key)
        .map(|tag| tag.value)
}

/// Builds the JSON body for the synchronous preflight GET issued ahead
/// of a mutation, per `spec.md` §4.4 and confirmed against
/// `original_source`'s `test_runs_tenant_policy.py` /
/// `test_registry_tenant_policy.py`: runs use `run_id`, registered
/// models use `name`, model versions use `name` + `version`.
pub fn preflight_request_body(kind: RouteKind, mutation_body: &Value) -> Option<Value> {
    let object = mutation_body.as_object()?;
    match kind {
        RouteKind::RunsMutation => {
            let run_id = object.get("run_id")?.clone();
            Some(serde_json::json!({ "run_id": run_id }))
        }
        RouteKind::RegisteredModelMutation => {
            let name = object.get("name")?.clone();
            Some(serde_json::json!({ "name": name }))
        }
        RouteKind::ModelVersionMutation => {
            let name = object.get("name")?.clone();
            let version = object.get("version")?.clone();
            Some(serde_json::json!({ "name": name, "version": version }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_tags_accepts_absent_list_mapping() {
        assert_eq!(normalize_tags(None).unwrap(), Vec::new());
        assert_eq!(
            normalize_tags(Some(&json!([{"key": "a", "value": "1"}]))).unwrap(),
            vec![Tag { key: "a".into(), value: "1".into() }]
        );
        assert_eq!(
            normalize_tags(Some(&json!({"a": "1"}))).unwrap(),
            vec![Tag { key: "a".into(), value: "1".into() }]
        );
    }

    #[test]
    fn normalize_tags_rejects_non_object_entries() {
        assert!(normalize_tags(Some(&json!(["not-an-object"]))).is_err());
    }

    #[test]
    fn inject_tenant_tag_appends_when_absent() {
        let mut body = json!({"tags": [{"key": "project", "value": "demo"}]});
        inject_tenant_tag(&mut body, "tenant", "tenant-a").unwrap();
        let tags = body["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().any(|t| t["key"] == "tenant" && t["value"] == "tenant-a"));
        assert!(tags.iter().any(|t| t["key"] == "project" && t["value"] == "demo"));
    }

    #[test]
    fn inject_tenant_tag_accepts_matching_existing() {
        let mut body = json!({"tags": [{"key": "tenant", "value": "tenant-a"}]});
        inject_tenant_tag(&mut body, "tenant", "tenant-a").unwrap();
        assert_eq!(body["tags"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn inject_tenant_tag_conflicts_on_mismatch() {
        let mut body = json!({"tags": [{"key": "tenant", "value": "other-tenant"}]});
        assert!(matches!(
            inject_tenant_tag(&mut body, "tenant", "tenant-a"),
            Err(TenantError::TenantConflict)
        ));
    }

    #[test]
    fn rewrite_search_filter_rejects_non_string_field() {
        let mut body = json!({"filter": 42});
        assert!(matches!(
            rewrite_search_filter(&mut body, "filter", "tenant", "tenant-a"),
            Err(TenantError::InvalidFilter)
        ));
    }

    #[test]
    fn append_tenant_filter_matches_spec_examples() {
        assert_eq!(
            append_tenant_filter(None, "tenant", "tenant-a"),
            "tags.tenant = 'tenant-a'"
        );
        assert_eq!(
            append_tenant_filter(Some("attributes.status = 'RUNNING'"), "tenant", "tenant-a"),
            "(attributes.status = 'RUNNING') and tags.tenant = 'tenant-a'"
        );
        let already = "(attributes.status = 'RUNNING') and tags.tenant = 'tenant-a'";
        assert_eq!(
            append_tenant_filter(Some(already), "tenant", "tenant-a"),
            already
        );
    }

    #[test]
    fn append_tenant_filter_escapes_single_quotes() {
        assert_eq!(
            append_tenant_filter(None, "tenant", "o'brien"),
            "tags.tenant = 'o''brien'"
        );
    }

    #[test]
    fn extract_response_tenant_reads_nested_paths() {
        let run_body = json!({"run": {"data": {"tags": [{"key": "tenant", "value": "tenant-b"}]}}});
        assert_eq!(
            extract_response_tenant(&run_body, RouteKind::RunsGet, "tenant"),
            Some("tenant-b".to_string())
        );

        let model_body = json!({"registered_model": {"tags": []}});
        assert_eq!(
            extract_response_tenant(&model_body, RouteKind::RegisteredModelGet, "tenant"),
            None
        );
    }

    #[test]
    fn preflight_body_extracts_identifiers_per_resource() {
        assert_eq!(
            preflight_request_body(RouteKind::RunsMutation, &json!({"run_id": "r1"})),
            Some(json!({"run_id": "r1"}))
        );
        assert_eq!(
            preflight_request_body(
                RouteKind::ModelVersionMutation,
                &json!({"name": "m1", "version": "3"})
            ),
            Some(json!({"name": "m1", "version": "3"}))
        );
        assert_eq!(
            preflight_request_body(RouteKind::RunsSearch, &json!({"run_id": "r1"})),
            None
        );
    }
}
