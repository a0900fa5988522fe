//! Pure dispatch from a request path to a [`RouteKind`]. No prefix
//! matching, ever — tenant policy correctness depends on exact
//! equality (`spec.md` §4.3).
//!
//! Grounded on `original_source/gateway/mlflow/tenant.py`'s family of
//! `is_*_path` predicates, collapsed into one table-driven `classify`.

use std::collections::HashSet;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    RunsCreate,
    RunsSearch,
    RunsGet,
    RunsMutation,
    RegisteredModelCreate,
    RegisteredModelsSearch,
    RegisteredModelGet,
    RegisteredModelMutation,
    ModelVersionCreate,
    ModelVersionGet,
    ModelVersionMutation,
    Other,
}

const API_VERSIONS: [&str; 2] = ["2.0", "2.1"];

fn versioned_paths(suffix: &str) -> Vec<String> {
    API_VERSIONS
        .iter()
        .map(|v| format!("/api/{}/mlflow/{}", v, suffix))
        .collect()
}

const RUNS_MUTATION_SUFFIXES: [&str; 8] = [
    "runs/update",
    "runs/delete",
    "runs/restore",
    "runs/log-batch",
    "runs/log-metric",
    "runs/log-parameter",
    "runs/set-tag",
    "runs/delete-tag",
];

const REGISTERED_MODEL_MUTATION_SUFFIXES: [&str; 6] = [
    "registered-models/delete",
    "registered-models/rename",
    "registered-models/set-tag",
    "registered-models/delete-tag",
    "registered-models/set-alias",
    "registered-models/delete-alias",
];

const MODEL_VERSION_MUTATION_SUFFIXES: [&str; 5] = [
    "model-versions/update",
    "model-versions/delete",
    "model-versions/transition-stage",
    "model-versions/set-tag",
    "model-versions/delete-tag",
];

struct RouteTable {
    runs_create: HashSet<String>,
    runs_search: HashSet<String>,
    runs_get: HashSet<String>,
    runs_mutation: HashSet<String>,
    registered_model_create: HashSet<String>,
    registered_models_search: HashSet<String>,
    registered_model_get: HashSet<String>,
    registered_model_mutation: HashSet<String>,
    model_version_create: HashSet<String>,
    model_version_get: HashSet<String>,
    model_version_mutation: HashSet<String>,
}

fn many(suffixes: &[&str]) -> HashSet<String> {
    suffixes
        .iter()
        .flat_map(|s| versioned_paths(s))
        .collect()
}

fn one(suffix: &str) -> HashSet<String> {
    versioned_paths(suffix).into_iter().collect()
}

static ROUTE_TABLE: LazyLock<RouteTable> = LazyLock::new(|| RouteTable {
    runs_create: one("runs/create"),
    runs_search: one("runs/search"),
    runs_get: one("runs/get"),
    runs_mutation: many(&RUNS_MUTATION_SUFFIXES),
    registered_model_create: one("registered-models/create"),
    registered_models_search: one("registered-models/search"),
    registered_model_get: one("registered-models/get"),
    registered_model_mutation: many(&REGISTERED_MODEL_MUTATION_SUFFIXES),
    model_version_create: one("model-versions/create"),
    model_version_get: one("model-versions/get"),
    model_version_mutation: many(&MODEL_VERSION_MUTATION_SUFFIXES),
});

/// Classify a request path. Pure and independent of HTTP method.
pub fn classify(path: &str) -> RouteKind {
    let table = &*ROUTE_TABLE;

    if table.runs_create.contains(path) {
        RouteKind::RunsCreate
    } else if table.runs_search.contains(path) {
        RouteKind::RunsSearch
    } else if table.runs_get.contains(path) {
        RouteKind::RunsGet
    } else if table.runs_mutation.contains(path) {
        RouteKind::RunsMutation
    } else if table.registered_model_create.contains(path) {
        RouteKind::RegisteredModelCreate
    } else if table.registered_models_search.contains(path) {
        RouteKind::RegisteredModelsSearch
    } else if table.registered_model_get.contains(path) {
        RouteKind::RegisteredModelGet
    } else if table.registered_model_mutation.contains(path) {
        RouteKind::RegisteredModelMutation
    } else if table.model_version_create.contains(path) {
        RouteKind::ModelVersionCreate
    } else if table.model_version_get.contains(path) {
        RouteKind::ModelVersionGet
    } else if table.model_version_mutation.contains(path) {
        RouteKind::ModelVersionMutation
    } else {
        RouteKind::Other
    }
}

/// The upstream `*/get` path that a mutation's preflight check targets,
/// for the corresponding resource family. `None` for non-mutation kinds.
pub fn preflight_get_path_for(path: &str, kind: RouteKind) -> Option<String> {
    let version = API_VERSIONS
        .iter()
        .find(|v| path.starts_with(&format!("/api/{}/", v)))?;

    match kind {
        RouteKind::RunsMutation => Some(format!("/api/{}/mlflow/runs/get", version)),
        RouteKind::RegisteredModelMutation => {
            Some(format!("/api/{}/mlflow/registered-models/get", version))
        }
        RouteKind::ModelVersionMutation => {
            Some(format!("/api/{}/mlflow/model-versions/get", version))
        }
        _ => None,
    }
}
