//! `OPTIONS` metadata and the OpenAPI document.
//!
//! Neither is scope-protected: they describe the schema, not the rows.

use axum::http::HeaderValue;
use axum::http::header::ALLOW;
use axum::response::Response;
use serde_json::{Map, Value, json};

use dso_core::schema::{FieldSchema, FieldType};
use dso_filters::FilterSet;
use dso_filters::ordering::SORT_PARAMS;
use dso_registry::ResourceDefinition;

use crate::error::ApiResult;
use crate::hal::{EXPAND_PARAM, EXPAND_SCOPE_PARAM, FIELDS_PARAM};
use crate::pagination::{PAGE_PARAM, PAGE_SIZE_PARAMS};
use crate::router::{ALLOWED_METHODS, API_PREFIX, Endpoint, RoutingTable};
use crate::routes::{ApiRequest, HAL_JSON, json_response};

/// `OPTIONS` on any `/v1` route.
///
/// # Errors
///
/// Infallible today; kept fallible like the other handlers.
pub fn options(request: &ApiRequest<'_>, endpoint: &Endpoint) -> ApiResult<Response> {
    let mut body = Map::new();
    body.insert("name".into(), json!(endpoint.label()));
    body.insert("renders".into(), json!([HAL_JSON, "application/json"]));
    body.insert("parses".into(), json!([]));
    body.insert(
        "allowedMethods".into(),
        json!(ALLOWED_METHODS.split(", ").collect::<Vec<_>>()),
    );

    match endpoint {
        Endpoint::List(resource) | Endpoint::Detail(resource) => {
            describe_resource(&mut body, resource);
        }
        Endpoint::Relation { resource, relation } => {
            body.insert("relation".into(), json!(relation));
            describe_resource(&mut body, resource);
        }
        Endpoint::DatasetIndex { dataset } => {
            body.insert("dataset".into(), json!(dataset));
        }
        Endpoint::Root | Endpoint::OpenApi => {
            body.insert(
                "openapi".into(),
                json!(format!("{}{API_PREFIX}/openapi.json", request.origin())),
            );
        }
    }

    let mut response = json_response(Value::Object(body));
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    Ok(response)
}

fn describe_resource(body: &mut Map<String, Value>, resource: &ResourceDefinition) {
    body.insert("dataset".into(), json!(resource.dataset_id()));
    body.insert("table".into(), json!(resource.name()));
    if let Some(description) = &resource.table().description {
        body.insert("description".into(), json!(description));
    }
    body.insert(
        "fields".into(),
        Value::Array(resource.fields().iter().map(describe_field).collect()),
    );
    body.insert(
        "filters".into(),
        Value::Array(
            FilterSet::for_resource(resource)
                .parameters()
                .into_iter()
                .map(|p| json!({"name": p.name, "type": p.kind}))
                .collect(),
        ),
    );
    body.insert("relations".into(), json!(resource.relation_names()));
    if let Some(temporal) = resource.temporal() {
        body.insert(
            "temporal".into(),
            json!({
                "identifier": temporal.identifier,
                "dimensions": temporal.dimensions.keys().collect::<Vec<_>>(),
            }),
        );
    }
}

fn describe_field(field: &FieldSchema) -> Value {
    let mut described = Map::new();
    described.insert("name".into(), json!(field.name));
    described.insert("type".into(), json!(field.field_type.as_str()));
    described.insert("nullable".into(), json!(field.nullable));
    if let Some(relation) = &field.relation {
        described.insert("relation".into(), json!(relation));
    }
    if let Some(auth) = &field.auth {
        described.insert("auth".into(), json!(auth.scopes()));
    }
    Value::Object(described)
}

/// `GET /v1/openapi.json`: an OpenAPI 3 document of the matched table.
///
/// # Errors
///
/// Infallible today; kept fallible like the other handlers.
pub fn openapi(request: &ApiRequest<'_>, table: &RoutingTable) -> ApiResult<Response> {
    let mut paths = Map::new();
    let mut schemas = Map::new();

    for endpoint in table.endpoints() {
        match endpoint {
            Endpoint::Root => {
                paths.insert(
                    format!("{API_PREFIX}/"),
                    operation("listDatasets", "Datasets", Vec::new(), None),
                );
            }
            Endpoint::OpenApi => {}
            Endpoint::DatasetIndex { dataset } => {
                paths.insert(
                    format!("{API_PREFIX}/{dataset}/"),
                    operation(&format!("{dataset}_index"), "Tables of the dataset", Vec::new(), None),
                );
            }
            Endpoint::List(resource) => {
                let name = schema_name(resource);
                schemas.insert(name.clone(), table_schema(resource));
                paths.insert(
                    format!("{API_PREFIX}/{}/{}/", resource.dataset_id(), resource.name()),
                    operation(
                        &format!("{name}_list"),
                        &format!("List of {}", resource.name()),
                        list_parameters(resource),
                        Some(&name),
                    ),
                );
            }
            Endpoint::Detail(resource) => {
                let name = schema_name(resource);
                let mut parameters = vec![path_parameter("id")];
                parameters.extend(detail_parameters(resource));
                paths.insert(
                    format!("{API_PREFIX}/{}/{}/{{id}}/", resource.dataset_id(), resource.name()),
                    operation(
                        &format!("{name}_retrieve"),
                        &format!("One {}", resource.name()),
                        parameters,
                        Some(&name),
                    ),
                );
            }
            Endpoint::Relation { resource, relation } => {
                let name = schema_name(resource);
                paths.insert(
                    format!(
                        "{API_PREFIX}/{}/{}/{{id}}/{relation}/",
                        resource.dataset_id(),
                        resource.name()
                    ),
                    operation(
                        &format!("{name}_{relation}"),
                        &format!("Related {relation}"),
                        vec![path_parameter("id")],
                        None,
                    ),
                );
            }
        }
    }

    let body = json!({
        "openapi": "3.0.3",
        "info": {
            "title": "DSO API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "servers": [{"url": request.origin()}],
        "paths": paths,
        "components": {"schemas": schemas},
    });
    Ok(json_response(body))
}

fn schema_name(resource: &ResourceDefinition) -> String {
    format!("{}_{}", resource.dataset_id(), resource.name())
}

fn operation(id: &str, summary: &str, parameters: Vec<Value>, schema: Option<&str>) -> Value {
    let body_schema = schema.map_or_else(
        || json!({"type": "object"}),
        |name| json!({"$ref": format!("#/components/schemas/{name}")}),
    );
    let mut content = Map::new();
    content.insert(HAL_JSON.to_string(), json!({"schema": body_schema}));
    json!({
        "get": {
            "operationId": id,
            "summary": summary,
            "parameters": parameters,
            "responses": {
                "200": {"description": "OK", "content": content},
                "400": {"description": "Invalid query parameters"},
                "403": {"description": "Scope not held"},
                "404": {"description": "Not found"},
                "406": {"description": "Unsupported Accept-Crs"},
            },
        }
    })
}

fn path_parameter(name: &str) -> Value {
    json!({"name": name, "in": "path", "required": true, "schema": {"type": "string"}})
}

fn query_parameter(name: &str, description: &str) -> Value {
    json!({"name": name, "in": "query", "required": false, "description": description, "schema": {"type": "string"}})
}

fn list_parameters(resource: &ResourceDefinition) -> Vec<Value> {
    let mut parameters: Vec<Value> = FilterSet::for_resource(resource)
        .parameters()
        .into_iter()
        .map(|p| query_parameter(&p.name, &format!("Filter ({})", p.kind)))
        .collect();
    parameters.push(query_parameter(SORT_PARAMS[0], "Comma separated fields; prefix '-' for descending"));
    parameters.push(query_parameter(PAGE_PARAM, "Page number"));
    parameters.push(query_parameter(PAGE_SIZE_PARAMS[0], "Page size"));
    parameters.extend(detail_parameters(resource));
    parameters
}

fn detail_parameters(resource: &ResourceDefinition) -> Vec<Value> {
    let mut parameters = vec![
        query_parameter(FIELDS_PARAM, "Comma separated fields to render"),
        query_parameter(EXPAND_PARAM, "Embed every relation when 'true'"),
        query_parameter(EXPAND_SCOPE_PARAM, "Comma separated relations to embed"),
    ];
    if let Some(temporal) = resource.temporal() {
        parameters.push(query_parameter(&temporal.identifier, "Version"));
        for dimension in temporal.dimensions.keys() {
            parameters.push(query_parameter(dimension, "Valid on date"));
        }
    }
    parameters
}

fn table_schema(resource: &ResourceDefinition) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in resource.fields() {
        properties.insert(field.name.clone(), openapi_type(field));
        if !field.nullable {
            required.push(field.name.clone());
        }
    }
    json!({"type": "object", "properties": properties, "required": required})
}

fn openapi_type(field: &FieldSchema) -> Value {
    let mut schema = match field.field_type {
        FieldType::String => json!({"type": "string"}),
        FieldType::Integer => json!({"type": "integer"}),
        FieldType::Number => json!({"type": "number"}),
        FieldType::Boolean => json!({"type": "boolean"}),
        FieldType::Date => json!({"type": "string", "format": "date"}),
        FieldType::DateTime => json!({"type": "string", "format": "date-time"}),
        FieldType::Time => json!({"type": "string", "format": "time"}),
        FieldType::Array => json!({"type": "array", "items": {"type": "string"}}),
        FieldType::Geometry => json!({"type": "object", "description": "GeoJSON geometry"}),
        FieldType::Object => json!({"type": "object"}),
    };
    if field.nullable {
        schema["nullable"] = json!(true);
    }
    schema
}
