//! Root listing and dataset index.

use axum::response::Response;
use serde_json::{Value, json};

use dso_registry::{DatasetEntry, RegistrySnapshot};

use crate::error::{ApiError, ApiResult};
use crate::hal::resource_url;
use crate::permissions::can_access;
use crate::router::{API_PREFIX, Endpoint, RoutingTable};
use crate::routes::{ApiRequest, hal_response};

/// `GET /v1/`: every dataset in the routing table the request matched.
///
/// # Errors
///
/// Returns a 400 [`ApiError`] when the request URL cannot be rendered.
pub fn datasets(request: &ApiRequest<'_>, table: &RoutingTable) -> ApiResult<Response> {
    let origin = request.origin();
    let snapshot = table.snapshot();

    let datasets: Vec<Value> = table
        .endpoints()
        .filter_map(|endpoint| match endpoint {
            Endpoint::DatasetIndex { dataset } => snapshot
                .dataset(dataset)
                .map(|entry| dataset_summary(&origin, dataset, entry)),
            _ => None,
        })
        .collect();

    let body = json!({
        "_links": {"self": {"href": request.url()?.as_str()}},
        "_embedded": {"datasets": datasets},
    });
    Ok(hal_response(body, None))
}

fn dataset_summary(origin: &str, id: &str, entry: &DatasetEntry) -> Value {
    let schema = entry.schema();
    json!({
        "_links": {"self": {"href": format!("{origin}{API_PREFIX}/{id}/")}},
        "id": id,
        "title": schema.title.clone().unwrap_or_else(|| id.to_string()),
        "service": if schema.is_remote() { "remote" } else { "local" },
        "versioned": schema.is_temporal(),
    })
}

/// `GET /v1/{dataset}/`: the tables of one dataset the caller may access.
///
/// # Errors
///
/// - 404 when the dataset is missing from `snapshot`
/// - 403 when the dataset scope is not held
pub fn dataset_index(
    request: &ApiRequest<'_>,
    snapshot: &RegistrySnapshot,
    dataset: &str,
) -> ApiResult<Response> {
    let origin = request.origin();
    let entry = snapshot
        .dataset(dataset)
        .ok_or_else(|| ApiError::not_found("Not found."))?;
    let schema = entry.schema();
    if !request.caller.scopes.satisfies(schema.auth.as_ref()) {
        return Err(ApiError::forbidden(format!(
            "You do not have permission to access dataset '{dataset}'."
        )));
    }

    let tables: Vec<Value> = entry
        .resources()
        .filter(|resource| can_access(resource, &request.caller.scopes))
        .map(|resource| {
            json!({
                "_links": {"self": {"href": resource_url(&origin, resource)}},
                "name": resource.name(),
                "description": resource.table().description,
            })
        })
        .collect();

    let body = json!({
        "_links": {"self": {"href": request.url()?.as_str()}},
        "id": dataset,
        "title": schema.title.clone().unwrap_or_else(|| dataset.to_string()),
        "_embedded": {"tables": tables},
    });
    Ok(hal_response(body, None))
}
