//! HAL rendering of store rows.
//!
//! Every rendered object carries `_links.self`. Forward relations become
//! links inside `_links`, reverse relations are rendered inline, and
//! `_expand`/`_expandScope` embed related objects under `_embedded`.
//!
//! Fields the caller may not read are omitted entirely. Relations to tables
//! the caller may not access are dropped as well; `_expand=true` drops them
//! silently while naming one in `_expandScope` is a 403.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value, json};

use dso_core::crs::Crs;
use dso_core::query::{Predicate, Query, SortKey};
use dso_core::schema::{FieldSchema, FieldType, PRIMARY_KEY};
use dso_core::scopes::{AuthorizationScopeSet, ProfileSet};
use dso_core::store::{Row, RowStore};
use dso_core::temporal::split_on_separator;
use dso_registry::{RegistrySnapshot, ResourceDefinition};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::permissions::{can_access, hidden_fields};
use crate::router::API_PREFIX;

/// Query parameter limiting the rendered fields.
pub const FIELDS_PARAM: &str = "_fields";

/// Query parameter expanding every forward relation when `true`.
pub const EXPAND_PARAM: &str = "_expand";

/// Query parameter expanding the named forward relations.
pub const EXPAND_SCOPE_PARAM: &str = "_expandScope";

/// Everything rendering needs besides the resource itself.
#[derive(Clone, Copy)]
pub struct HalContext<'a> {
    /// Absolute origin of links, without trailing slash.
    pub origin: &'a str,
    /// Resolved request context.
    pub request: &'a RequestContext,
    /// Registry snapshot the request was routed with.
    pub snapshot: &'a RegistrySnapshot,
    /// Caller scopes.
    pub scopes: &'a AuthorizationScopeSet,
    /// Field-access profiles.
    pub profiles: &'a ProfileSet,
    /// Store for related rows.
    pub store: &'a dyn RowStore,
}

impl std::fmt::Debug for HalContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalContext")
            .field("origin", &self.origin)
            .field("request", &self.request)
            .field("generation", &self.snapshot.generation())
            .finish_non_exhaustive()
    }
}

/// Which forward relations to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// Embed nothing.
    None,
    /// `_expand=true`: every relation the caller may see.
    All,
    /// `_expandScope=a,b`: exactly these relations.
    Named(Vec<String>),
}

impl Expansion {
    /// Reads `_expandScope` (preferred) or `_expand` from the query.
    #[must_use]
    pub fn from_params(params: &[(String, String)]) -> Self {
        if let Some((_, raw)) = params.iter().find(|(k, _)| k == EXPAND_SCOPE_PARAM) {
            let names: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !names.is_empty() {
                return Self::Named(names);
            }
        }
        match params.iter().find(|(k, _)| k == EXPAND_PARAM) {
            Some((_, value)) if value.eq_ignore_ascii_case("true") || value == "1" => Self::All,
            _ => Self::None,
        }
    }
}

/// Returns `{origin}/v1/{dataset}/{table}/`.
#[must_use]
pub fn resource_url(origin: &str, resource: &ResourceDefinition) -> String {
    format!(
        "{origin}{API_PREFIX}/{}/{}/",
        resource.dataset_id(),
        resource.name()
    )
}

/// Renders rows of one resource for one request.
#[derive(Debug)]
pub struct ResourceRenderer<'a> {
    ctx: HalContext<'a>,
    resource: Arc<ResourceDefinition>,
    hidden: BTreeSet<String>,
    selected: Option<BTreeSet<String>>,
}

impl<'a> ResourceRenderer<'a> {
    /// Creates a renderer hiding the fields the caller may not read.
    #[must_use]
    pub fn new(ctx: HalContext<'a>, resource: Arc<ResourceDefinition>) -> Self {
        let hidden = hidden_fields(&resource, ctx.scopes, ctx.profiles);
        Self {
            ctx,
            resource,
            hidden,
            selected: None,
        }
    }

    /// Returns the names of hidden fields.
    #[must_use]
    pub fn hidden(&self) -> &BTreeSet<String> {
        &self.hidden
    }

    /// Limits rendering to the `_fields` selection.
    ///
    /// # Errors
    ///
    /// - 400 listing unknown names
    /// - 403 for a name the caller may not read
    pub fn select_fields(mut self, params: &[(String, String)]) -> Result<Self, ApiError> {
        let Some((_, raw)) = params.iter().find(|(k, _)| k == FIELDS_PARAM) else {
            return Ok(self);
        };
        let names: BTreeSet<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let relations: Vec<&str> = self.resource.relation_names();
        let unknown: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| self.resource.field(name).is_none() && !relations.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::invalid_params(vec![dso_filters::InvalidParam::new(
                FIELDS_PARAM,
                format!("Unknown field names: {}", unknown.join(", ")),
            )]));
        }
        if let Some(name) = names.iter().find(|name| self.hidden.contains(*name)) {
            return Err(ApiError::forbidden(format!(
                "Access to field '{name}' is not allowed"
            )));
        }

        if !names.is_empty() {
            self.selected = Some(names);
        }
        Ok(self)
    }

    fn shows(&self, name: &str) -> bool {
        !self.hidden.contains(name)
            && self
                .selected
                .as_ref()
                .is_none_or(|selected| selected.contains(name))
    }

    /// Returns the URL of the resource's list endpoint.
    #[must_use]
    pub fn base_url(&self) -> String {
        resource_url(self.ctx.origin, &self.resource)
    }

    /// Renders `_links.self` of a row.
    #[must_use]
    pub fn self_link(&self, row: &Row) -> Value {
        let identifier = self
            .resource
            .field(self.resource.identifier())
            .and_then(|field| row.get(&field.column()))
            .map(scalar_string)
            .unwrap_or_default();
        let base = self.base_url();

        match self.resource.temporal() {
            Some(temporal) => {
                let version = self
                    .resource
                    .field(&temporal.identifier)
                    .and_then(|field| row.get(&field.column()))
                    .map(scalar_string)
                    .unwrap_or_default();
                let mut link = Map::new();
                link.insert(
                    "href".into(),
                    json!(format!(
                        "{base}{identifier}/?{}={version}",
                        temporal.identifier
                    )),
                );
                link.insert("title".into(), json!(format!("{identifier}.{version}")));
                link.insert(self.resource.identifier().to_string(), json!(identifier));
                link.insert(temporal.identifier.clone(), json!(version));
                Value::Object(link)
            }
            None => json!({"href": format!("{base}{identifier}/"), "title": identifier}),
        }
    }

    /// Renders one forward relation link.
    ///
    /// Returns `None` when the target table is unknown or not accessible.
    fn relation_link(&self, field: &FieldSchema, row: &Row) -> Option<Value> {
        let target = self.target_of(field)?;
        if !can_access(target, self.ctx.scopes) {
            return None;
        }
        let Some(fk) = row.get(&field.column()).filter(|v| !v.is_null()) else {
            return Some(Value::Null);
        };
        let fk = scalar_string(fk);
        let target_base = resource_url(self.ctx.origin, target);

        let href = match target.temporal() {
            Some(temporal) => {
                let (identifier, version) = split_on_separator(&fk);
                // The request's version key only means the same thing on a
                // target with identical temporal dimensions.
                let pin = self
                    .ctx
                    .request
                    .temporal_query()
                    .filter(|_| self.resource.temporal() == Some(temporal))
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .or_else(|| version.map(|v| (temporal.identifier.clone(), v.to_string())));
                match pin {
                    Some((key, value)) => format!("{target_base}{identifier}/?{key}={value}"),
                    None => format!("{target_base}{identifier}/"),
                }
            }
            None => format!("{target_base}{fk}/"),
        };
        Some(json!({"href": href, "title": fk}))
    }

    fn target_of(&self, field: &FieldSchema) -> Option<&'a Arc<ResourceDefinition>> {
        let snapshot: &'a RegistrySnapshot = self.ctx.snapshot;
        let (dataset, table) = field.relation_target(self.resource.dataset_id())?;
        snapshot.resource(&dataset, &table)
    }

    /// Renders one row: `_links`, then every visible field.
    #[must_use]
    pub fn render(&self, row: &Row) -> Map<String, Value> {
        let mut links = Map::new();
        links.insert("self".into(), self.self_link(row));

        let mut object = Map::new();
        for field in self.resource.fields() {
            if !self.shows(&field.name) {
                continue;
            }
            if field.is_relation() {
                if let Some(link) = self.relation_link(field, row) {
                    links.insert(field.name.clone(), link);
                }
                continue;
            }
            let value = row.get(&field.column()).cloned().unwrap_or(Value::Null);
            object.insert(field.name.clone(), self.render_value(field, value));
        }

        let mut rendered = Map::new();
        rendered.insert("_links".into(), Value::Object(links));
        rendered.extend(object);
        rendered
    }

    fn render_value(&self, field: &FieldSchema, value: Value) -> Value {
        match field.field_type {
            FieldType::Geometry => {
                let mut value = value;
                if let Some(target) = self.ctx.request.content_crs {
                    if !value.is_null() {
                        Crs::STORAGE.transform_geojson(target, &mut value);
                    }
                }
                value
            }
            _ if field.name == PRIMARY_KEY && self.ctx.request.is_versioned => match &value {
                Value::String(id) => Value::String(split_on_separator(id).0.to_string()),
                _ => value,
            },
            _ => value,
        }
    }

    /// Renders rows with their reverse relations inlined.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when related rows cannot be fetched.
    pub async fn render_rows(&self, rows: &[Row]) -> Result<Vec<Map<String, Value>>, ApiError> {
        let mut rendered: Vec<Map<String, Value>> = rows.iter().map(|row| self.render(row)).collect();
        if rows.is_empty() {
            return Ok(rendered);
        }

        let parent_ids: Vec<Value> = rows
            .iter()
            .filter_map(|row| row.get(PRIMARY_KEY).cloned())
            .filter(|v| !v.is_null())
            .collect();

        for relation in &self.resource.table().reverse_relations {
            if !self.shows(&relation.name) {
                continue;
            }
            let Some(target) = self
                .ctx
                .snapshot
                .resource(self.resource.dataset_id(), &relation.table)
            else {
                continue;
            };
            if !can_access(target, self.ctx.scopes) {
                continue;
            }
            let Some(fk) = target.field(&relation.field) else {
                continue;
            };
            let fk_column = fk.column();

            let query = Query::all(target.key().clone())
                .with_filter(Predicate::In {
                    column: fk_column.clone(),
                    values: parent_ids.clone(),
                })
                .with_order(vec![SortKey::asc(PRIMARY_KEY)]);
            let page = self.ctx.store.fetch(&query).await?;

            let child = ResourceRenderer::new(self.ctx, Arc::clone(target));
            let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
            for child_row in &page.rows {
                if let Some(parent) = child_row.get(&fk_column).filter(|v| !v.is_null()) {
                    grouped
                        .entry(scalar_string(parent))
                        .or_default()
                        .push(Value::Object(child.render(child_row)));
                }
            }

            for (row, object) in rows.iter().zip(rendered.iter_mut()) {
                let children = row
                    .get(PRIMARY_KEY)
                    .map(scalar_string)
                    .and_then(|id| grouped.get(&id).cloned())
                    .unwrap_or_default();
                object.insert(relation.name.clone(), Value::Array(children));
            }
        }

        Ok(rendered)
    }

    /// Resolves which forward relations to embed.
    ///
    /// # Errors
    ///
    /// For [`Expansion::Named`]: 400 for a name that is not a forward
    /// relation, 403 for one the caller may not see.
    pub fn expanded_relations(
        &self,
        expansion: &Expansion,
    ) -> Result<Vec<(&FieldSchema, &'a Arc<ResourceDefinition>)>, ApiError> {
        match expansion {
            Expansion::None => Ok(Vec::new()),
            Expansion::All => Ok(self
                .resource
                .table()
                .relations()
                .filter(|field| self.shows(&field.name))
                .filter_map(|field| self.target_of(field).map(|target| (field, target)))
                .filter(|(_, target)| can_access(target, self.ctx.scopes))
                .collect()),
            Expansion::Named(names) => {
                let mut expanded = Vec::with_capacity(names.len());
                let mut unknown = Vec::new();
                for name in names {
                    let Some((field, target)) = self
                        .resource
                        .field(name)
                        .filter(|field| field.is_relation())
                        .and_then(|field| self.target_of(field).map(|target| (field, target)))
                    else {
                        unknown.push(name.as_str());
                        continue;
                    };
                    if self.hidden.contains(name) || !can_access(target, self.ctx.scopes) {
                        return Err(ApiError::forbidden(format!(
                            "Eager loading not allowed for field '{name}'"
                        )));
                    }
                    expanded.push((field, target));
                }
                if !unknown.is_empty() {
                    return Err(ApiError::invalid_params(vec![dso_filters::InvalidParam::new(
                        EXPAND_SCOPE_PARAM,
                        format!(
                            "Eager loading is not supported for field(s): {}",
                            unknown.join(", ")
                        ),
                    )]));
                }
                Ok(expanded)
            }
        }
    }

    /// Fetches and renders the related objects of `rows`, keyed by relation
    /// name and then by foreign key value.
    ///
    /// # Errors
    ///
    /// Propagates expansion and store errors.
    pub async fn fetch_embedded(
        &self,
        rows: &[Row],
        expansion: &Expansion,
    ) -> Result<BTreeMap<String, Vec<(String, Value)>>, ApiError> {
        let mut embedded = BTreeMap::new();
        for (field, target) in self.expanded_relations(expansion)? {
            let column = field.column();
            let mut keys: Vec<Value> = Vec::new();
            for row in rows {
                if let Some(value) = row.get(&column).filter(|v| !v.is_null()) {
                    if !keys.contains(value) {
                        keys.push(value.clone());
                    }
                }
            }

            let mut objects = Vec::new();
            if !keys.is_empty() {
                let query = Query::all(target.key().clone())
                    .with_filter(Predicate::In {
                        column: PRIMARY_KEY.to_string(),
                        values: keys,
                    })
                    .with_order(vec![SortKey::asc(PRIMARY_KEY)]);
                let page = self.ctx.store.fetch(&query).await?;
                let renderer = ResourceRenderer::new(self.ctx, Arc::clone(target));
                for (related, rendered) in page
                    .rows
                    .iter()
                    .zip(renderer.render_rows(&page.rows).await?)
                {
                    let key = related.get(PRIMARY_KEY).map(scalar_string).unwrap_or_default();
                    objects.push((key, Value::Object(rendered)));
                }
            }
            embedded.insert(field.name.clone(), objects);
        }
        Ok(embedded)
    }

    /// Renders a listing page: rows plus top-level embedded relations.
    ///
    /// # Errors
    ///
    /// Propagates expansion and store errors.
    pub async fn render_list(
        &self,
        rows: &[Row],
        expansion: &Expansion,
    ) -> Result<(Vec<Value>, Map<String, Value>), ApiError> {
        let items = self
            .render_rows(rows)
            .await?
            .into_iter()
            .map(Value::Object)
            .collect();
        let mut embedded = Map::new();
        for (name, objects) in self.fetch_embedded(rows, expansion).await? {
            embedded.insert(
                name,
                Value::Array(objects.into_iter().map(|(_, object)| object).collect()),
            );
        }
        Ok((items, embedded))
    }

    /// Renders a detail object with nested `_embedded` relations.
    ///
    /// # Errors
    ///
    /// Propagates expansion and store errors.
    pub async fn render_detail(
        &self,
        row: &Row,
        expansion: &Expansion,
    ) -> Result<Map<String, Value>, ApiError> {
        let rows = std::slice::from_ref(row);
        let mut object = self
            .render_rows(rows)
            .await?
            .pop()
            .unwrap_or_default();
        let embedded = self.fetch_embedded(rows, expansion).await?;
        if !embedded.is_empty() {
            let mut nested = Map::new();
            for (name, objects) in embedded {
                let value = objects
                    .into_iter()
                    .next()
                    .map_or(Value::Null, |(_, object)| object);
                nested.insert(name, value);
            }
            object.insert("_embedded".into(), Value::Object(nested));
        }
        Ok(object)
    }
}

/// Renders a scalar JSON value as a plain string.
#[must_use]
pub fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
