//! List, detail and relation endpoints of dataset tables.
//!
//! Local tables are answered from the [`RowStore`]; remote tables are
//! proxied through [`crate::remote::RemoteClient`].
//!
//! [`RowStore`]: dso_core::store::RowStore

use std::sync::Arc;

use axum::response::Response;
use serde_json::{Map, Value, json};

use dso_core::query::{Predicate, Query, SortKey};
use dso_core::schema::{FieldSchema, FieldType, PRIMARY_KEY};
use dso_core::store::Row;
use dso_core::temporal::split_on_separator;
use dso_filters::{FilterOptions, FilterSet, parse_ordering};
use dso_registry::{Backend, RegistrySnapshot, ResourceDefinition};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::hal::{Expansion, HalContext, ResourceRenderer, resource_url, scalar_string};
use crate::pagination::PageRequest;
use crate::permissions::{check_access, hidden_fields};
use crate::remote::{self, Forwarded};
use crate::routes::{ApiRequest, hal_response};

const NOT_FOUND: &str = "Not found.";

/// `GET /v1/{dataset}/{table}/`
///
/// # Errors
///
/// Returns the [`ApiError`] of the first failing step: access check,
/// context resolution, filtering, ordering, pagination or store access.
pub async fn list(
    request: &ApiRequest<'_>,
    snapshot: &RegistrySnapshot,
    resource: &Arc<ResourceDefinition>,
) -> ApiResult<Response> {
    check_access(resource, &request.caller.scopes)?;
    let context = RequestContext::resolve(resource, &request.params, request.headers)?;
    if let Backend::Remote { endpoint } = resource.backend() {
        return remote_list(request, resource, endpoint, &context).await;
    }

    let origin = request.origin();
    let renderer = ResourceRenderer::new(hal_context(request, &origin, &context, snapshot), Arc::clone(resource))
        .select_fields(&request.params)?;
    let expansion = Expansion::from_params(&request.params);

    let filter = FilterSet::for_resource(resource)
        .apply(&request.params, &filter_options(request, &context, &renderer))?;
    let order = ordering(resource, request, &renderer)?;
    let page = PageRequest::from_params(&request.params, &request.state.config.pagination)?;

    let query = Query::all(resource.key().clone())
        .with_filter(filter)
        .with_order(order)
        .with_window(page.size, page.offset());
    let rows = request.state.store.fetch(&query).await?;
    page.check_in_range(rows.total)?;
    tracing::debug!(total = rows.total, page = page.number, "listing fetched");

    let (items, embedded) = renderer.render_list(&rows.rows, &expansion).await?;
    let mut body = page.envelope(&request.url()?, resource.name(), items, rows.total);
    if let Some(slot) = body.get_mut("_embedded").and_then(Value::as_object_mut) {
        slot.extend(embedded);
    }
    Ok(hal_response(body, context.content_crs))
}

/// `GET /v1/{dataset}/{table}/{id}/`
///
/// # Errors
///
/// Returns a 404 [`ApiError`] when no row matches `id`, or the error of a
/// failing access, context or store step.
pub async fn detail(
    request: &ApiRequest<'_>,
    snapshot: &RegistrySnapshot,
    resource: &Arc<ResourceDefinition>,
    id: &str,
) -> ApiResult<Response> {
    check_access(resource, &request.caller.scopes)?;
    let context = RequestContext::resolve(resource, &request.params, request.headers)?;
    if let Backend::Remote { endpoint } = resource.backend() {
        return remote_detail(request, resource, endpoint, id, &context).await;
    }

    let origin = request.origin();
    let renderer = ResourceRenderer::new(hal_context(request, &origin, &context, snapshot), Arc::clone(resource))
        .select_fields(&request.params)?;
    let expansion = Expansion::from_params(&request.params);

    let row = find_row(request, resource, &context, &renderer, id)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    let object = renderer.render_detail(&row, &expansion).await?;
    Ok(hal_response(Value::Object(object), context.content_crs))
}

/// `GET /v1/{dataset}/{table}/{id}/{relation}/`
///
/// A forward relation renders the related object; a reverse relation
/// renders a paginated listing of the rows pointing back.
///
/// # Errors
///
/// - 404 when the parent row, the relation or a forward target is missing
/// - 403 when the related table is not accessible
pub async fn relation(
    request: &ApiRequest<'_>,
    snapshot: &RegistrySnapshot,
    resource: &Arc<ResourceDefinition>,
    id: &str,
    relation: &str,
) -> ApiResult<Response> {
    check_access(resource, &request.caller.scopes)?;
    if resource.is_remote() {
        return Err(ApiError::not_found(NOT_FOUND));
    }
    let context = RequestContext::resolve(resource, &request.params, request.headers)?;
    let origin = request.origin();
    let parent_renderer =
        ResourceRenderer::new(hal_context(request, &origin, &context, snapshot), Arc::clone(resource));
    if parent_renderer.hidden().contains(relation) {
        return Err(ApiError::forbidden(format!(
            "Access to field '{relation}' is not allowed"
        )));
    }

    // The parent is looked up without the caller's filters.
    let parent = find_row(request, resource, &context, &parent_renderer, id)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;

    if let Some(field) = resource.field(relation).filter(|f| f.is_relation()) {
        return forward_relation(request, resource, snapshot, &origin, field, &parent).await;
    }

    let reverse = resource
        .table()
        .reverse_relations
        .iter()
        .find(|r| r.name == relation)
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    let target = snapshot
        .resource(resource.dataset_id(), &reverse.table)
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    check_access(target, &request.caller.scopes)?;
    let fk = target
        .field(&reverse.field)
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    let parent_key = parent.get(PRIMARY_KEY).cloned().unwrap_or(Value::Null);

    let target_context = RequestContext::resolve(target, &request.params, request.headers)?;
    let renderer = ResourceRenderer::new(
        hal_context(request, &origin, &target_context, snapshot),
        Arc::clone(target),
    )
    .select_fields(&request.params)?;
    let filter = FilterSet::for_resource(target)
        .apply(&request.params, &filter_options(request, &target_context, &renderer))?;
    let order = ordering(target, request, &renderer)?;
    let page = PageRequest::from_params(&request.params, &request.state.config.pagination)?;

    let query = Query::all(target.key().clone())
        .with_filter(Predicate::and(vec![
            Predicate::equals(fk.column(), parent_key),
            filter,
        ]))
        .with_order(order)
        .with_window(page.size, page.offset());
    let rows = request.state.store.fetch(&query).await?;
    page.check_in_range(rows.total)?;

    let expansion = Expansion::from_params(&request.params);
    let (items, embedded) = renderer.render_list(&rows.rows, &expansion).await?;
    let mut body = page.envelope(&request.url()?, relation, items, rows.total);
    if let Some(slot) = body.get_mut("_embedded").and_then(Value::as_object_mut) {
        slot.extend(embedded);
    }
    Ok(hal_response(body, target_context.content_crs))
}

async fn forward_relation(
    request: &ApiRequest<'_>,
    resource: &ResourceDefinition,
    snapshot: &RegistrySnapshot,
    origin: &str,
    field: &FieldSchema,
    parent: &Row,
) -> ApiResult<Response> {
    let target = field
        .relation_target(resource.dataset_id())
        .and_then(|(dataset, table)| snapshot.resource(&dataset, &table))
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    check_access(target, &request.caller.scopes)?;

    let fk = parent
        .get(&field.column())
        .filter(|v| !v.is_null())
        .map(scalar_string)
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;

    let context = RequestContext::resolve(target, &request.params, request.headers)?;
    let renderer = ResourceRenderer::new(
        hal_context(request, origin, &context, snapshot),
        Arc::clone(target),
    )
    .select_fields(&request.params)?;
    let row = find_row(request, target, &context, &renderer, &fk)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    let object = renderer
        .render_detail(&row, &Expansion::from_params(&request.params))
        .await?;
    Ok(hal_response(Value::Object(object), context.content_crs))
}

fn hal_context<'a>(
    request: &'a ApiRequest<'_>,
    origin: &'a str,
    context: &'a RequestContext,
    snapshot: &'a RegistrySnapshot,
) -> HalContext<'a> {
    HalContext {
        origin,
        request: context,
        snapshot,
        scopes: &request.caller.scopes,
        profiles: &request.state.profiles,
        store: request.state.store.as_ref(),
    }
}

fn filter_options(
    request: &ApiRequest<'_>,
    context: &RequestContext,
    renderer: &ResourceRenderer<'_>,
) -> FilterOptions {
    FilterOptions {
        multi_value: request.state.config.filters.multi_value,
        accept_crs: context.accept_crs,
        hidden_fields: renderer.hidden().clone(),
    }
}

/// Requested ordering, falling back to the primary key.
fn ordering(
    resource: &ResourceDefinition,
    request: &ApiRequest<'_>,
    renderer: &ResourceRenderer<'_>,
) -> ApiResult<Vec<SortKey>> {
    let mut order = parse_ordering(resource, &request.params, renderer.hidden())?;
    if order.is_empty() {
        order.push(SortKey::asc(PRIMARY_KEY));
    }
    Ok(order)
}

/// Finds the row `id` addresses.
///
/// `ident@version` addresses one version directly. A bare identifier of a
/// temporal table selects the version named by the temporal identifier
/// parameter, else the version valid at the selected dimension, else the
/// latest version.
async fn find_row(
    request: &ApiRequest<'_>,
    resource: &ResourceDefinition,
    context: &RequestContext,
    renderer: &ResourceRenderer<'_>,
    id: &str,
) -> ApiResult<Option<Row>> {
    let (filter, order) = match resource.temporal() {
        Some(temporal) => {
            let (identifier, version) = split_on_separator(id);
            let order = resource
                .field(&temporal.identifier)
                .map(|field| vec![SortKey::desc(field.column())])
                .unwrap_or_default();
            if version.is_some() {
                (Predicate::equals(PRIMARY_KEY, id), order)
            } else {
                let Some(key) = identifier_predicate(resource, identifier) else {
                    return Ok(None);
                };
                let temporal_params: Vec<(String, String)> = request
                    .params
                    .iter()
                    .filter(|(name, _)| {
                        *name == temporal.identifier || temporal.dimensions.contains_key(name)
                    })
                    .cloned()
                    .collect();
                let pinned = FilterSet::for_resource(resource)
                    .apply(&temporal_params, &filter_options(request, context, renderer))?;
                (Predicate::and(vec![key, pinned]), order)
            }
        }
        None => {
            let Some(key) = identifier_predicate(resource, id) else {
                return Ok(None);
            };
            (key, Vec::new())
        }
    };

    let query = Query::all(resource.key().clone())
        .with_filter(filter)
        .with_order(order)
        .with_window(1, 0);
    let page = request.state.store.fetch(&query).await?;
    Ok(page.rows.into_iter().next())
}

/// Equality on the identifier column; `None` when `raw` cannot be a value of
/// the identifier's type.
fn identifier_predicate(resource: &ResourceDefinition, raw: &str) -> Option<Predicate> {
    let field = resource.field(resource.identifier())?;
    let value = match field.field_type {
        FieldType::Integer => Value::from(raw.parse::<i64>().ok()?),
        FieldType::Number => Value::from(raw.parse::<f64>().ok()?),
        _ => Value::String(raw.to_string()),
    };
    Some(Predicate::equals(field.column(), value))
}

// ============================================================================
// Remote tables
// ============================================================================

async fn remote_list(
    request: &ApiRequest<'_>,
    resource: &ResourceDefinition,
    endpoint: &str,
    context: &RequestContext,
) -> ApiResult<Response> {
    let hidden = hidden_fields(resource, &request.caller.scopes, &request.state.profiles);
    let data = request.state.remote.get(endpoint, forwarded(request)).await?;
    remote::validate_list(resource.table(), &data)?;

    let base = resource_url(&request.origin(), resource);
    let items: Vec<Value> = data
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let mut object = remote::project(resource.table(), item, &hidden);
                    remote::del_none(&mut object);
                    ensure_self_link(&mut object, || {
                        let id = item.get(PRIMARY_KEY).map(scalar_string).unwrap_or_default();
                        format!("{base}{id}/")
                    });
                    Value::Object(object)
                })
                .collect()
        })
        .unwrap_or_default();

    let mut embedded = Map::new();
    embedded.insert(resource.name().to_string(), Value::Array(items));
    let body = json!({
        "_links": {"self": {"href": request.url()?.as_str()}},
        "_embedded": embedded,
    });
    Ok(hal_response(body, context.content_crs))
}

async fn remote_detail(
    request: &ApiRequest<'_>,
    resource: &ResourceDefinition,
    endpoint: &str,
    id: &str,
    context: &RequestContext,
) -> ApiResult<Response> {
    let hidden = hidden_fields(resource, &request.caller.scopes, &request.state.profiles);
    let url = remote::detail_url(endpoint, id).ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    let data = request.state.remote.get(&url, forwarded(request)).await?;
    remote::validate_detail(resource.table(), &data)?;

    let mut object = remote::project(resource.table(), &data, &hidden);
    remote::del_none(&mut object);
    let self_href = request.url()?.to_string();
    ensure_self_link(&mut object, || self_href);
    Ok(hal_response(Value::Object(object), context.content_crs))
}

fn forwarded<'a>(request: &'a ApiRequest<'_>) -> Forwarded<'a> {
    Forwarded {
        headers: request.headers,
        client_ip: request.client_ip,
    }
}

/// Puts `_links` first and gives it a `self` link when upstream sent none.
fn ensure_self_link(object: &mut Map<String, Value>, href: impl FnOnce() -> String) {
    let mut links = match object.remove("_links") {
        Some(Value::Object(links)) => links,
        _ => Map::new(),
    };
    if !links.contains_key("self") {
        links.insert("self".into(), json!({"href": href()}));
    }
    let mut ordered = Map::new();
    ordered.insert("_links".into(), Value::Object(links));
    ordered.append(object);
    *object = ordered;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_link_is_added_first() {
        let mut object = Map::new();
        object.insert("id".into(), json!("1"));
        ensure_self_link(&mut object, || "http://x/1/".to_string());
        assert_eq!(object.keys().next().map(String::as_str), Some("_links"));
        assert_eq!(object["_links"]["self"]["href"], "http://x/1/");
    }

    #[test]
    fn upstream_self_link_is_kept() {
        let mut object = Map::new();
        object.insert("_links".into(), json!({"self": {"href": "http://upstream/1"}}));
        ensure_self_link(&mut object, || "http://x/1/".to_string());
        assert_eq!(object["_links"]["self"]["href"], "http://upstream/1");
    }
}
