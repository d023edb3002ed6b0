//! Runtime resource definitions.
//!
//! A [`ResourceDefinition`] is the queryable shape of one table: its fields,
//! their store columns, its temporal key layout and where its rows live.

use std::collections::HashSet;
use std::sync::Arc;

use dso_core::schema::{DatasetSchema, FieldSchema, PRIMARY_KEY, TableSchema, TemporalConfig};
use dso_core::scopes::ScopeRequirement;
use dso_core::store::TableRef;

use crate::error::{Result, SchemaError};

/// Where the rows of a resource come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// The local relational store.
    Local,
    /// An upstream JSON service.
    Remote {
        /// Endpoint serving this table's list and detail views.
        endpoint: String,
    },
}

/// The runtime definition of one table, keyed by `(dataset, table)`.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    dataset: Arc<DatasetSchema>,
    table: TableSchema,
    table_ref: TableRef,
    backend: Backend,
}

impl ResourceDefinition {
    /// Builds the definition for `table` of `dataset`.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the table has duplicate fields, lacks
    /// its identifier field, or lacks any field the temporal configuration
    /// names.
    pub fn from_schema(dataset: Arc<DatasetSchema>, table: &TableSchema) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &table.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    dataset: dataset.id.clone(),
                    table: table.id.clone(),
                    field: field.name.clone(),
                });
            }
        }

        if table.field(&dataset.identifier).is_none() {
            return Err(SchemaError::MissingIdentifier {
                dataset: dataset.id.clone(),
                table: table.id.clone(),
                field: dataset.identifier.clone(),
            });
        }

        if let Some(temporal) = &dataset.temporal {
            let required = std::iter::once(PRIMARY_KEY)
                .chain(std::iter::once(temporal.identifier.as_str()))
                .chain(
                    temporal
                        .dimensions
                        .values()
                        .flat_map(|fields| fields.iter().map(String::as_str)),
                );
            for name in required {
                if table.field(name).is_none() {
                    return Err(SchemaError::MissingTemporalField {
                        dataset: dataset.id.clone(),
                        table: table.id.clone(),
                        field: name.to_string(),
                    });
                }
            }
        }

        let backend = match &dataset.remote {
            Some(remote) => Backend::Remote {
                endpoint: format!("{}/{}/", remote.url.trim_end_matches('/'), table.id),
            },
            None => Backend::Local,
        };

        Ok(Self {
            table_ref: TableRef::new(&dataset.id, &table.id),
            table: table.clone(),
            dataset,
            backend,
        })
    }

    /// Returns the registry key.
    #[must_use]
    pub fn key(&self) -> &TableRef {
        &self.table_ref
    }

    /// Returns the dataset id.
    #[must_use]
    pub fn dataset_id(&self) -> &str {
        &self.table_ref.dataset
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.table_ref.table
    }

    /// Returns the owning dataset schema.
    #[must_use]
    pub fn dataset(&self) -> &DatasetSchema {
        &self.dataset
    }

    /// Returns the table schema.
    #[must_use]
    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    /// Returns the backend serving this resource.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Returns true when rows come from an upstream service.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self.backend, Backend::Remote { .. })
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSchema] {
        &self.table.fields
    }

    /// Looks up a field by external name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.table.field(name)
    }

    /// Returns the temporal configuration of the dataset, if any.
    #[must_use]
    pub fn temporal(&self) -> Option<&TemporalConfig> {
        self.dataset.temporal.as_ref()
    }

    /// Returns the identifier field name of the dataset.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.dataset.identifier
    }

    /// Returns the dataset-level scope requirement.
    #[must_use]
    pub fn dataset_auth(&self) -> Option<&ScopeRequirement> {
        self.dataset.auth.as_ref()
    }

    /// Returns the table-level scope requirement.
    #[must_use]
    pub fn table_auth(&self) -> Option<&ScopeRequirement> {
        self.table.auth.as_ref()
    }

    /// Returns the names of forward relation fields and reverse relations.
    #[must_use]
    pub fn relation_names(&self) -> Vec<&str> {
        self.table
            .relations()
            .map(|f| f.name.as_str())
            .chain(self.table.reverse_relations.iter().map(|r| r.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dso_core::schema::DatasetSchema;

    fn dataset(document: &str) -> Arc<DatasetSchema> {
        Arc::new(DatasetSchema::from_json(document).expect("schema"))
    }

    #[test]
    fn builds_local_resource() {
        let ds = dataset(
            r#"{"id": "bommen", "tables": [{"id": "bommen", "fields": [
                {"name": "id", "type": "integer"}, {"name": "naam", "type": "string"}
            ]}]}"#,
        );
        let resource = ResourceDefinition::from_schema(Arc::clone(&ds), &ds.tables[0]).expect("resource");
        assert_eq!(resource.key(), &TableRef::new("bommen", "bommen"));
        assert_eq!(resource.backend(), &Backend::Local);
        assert!(resource.field("naam").is_some());
    }

    #[test]
    fn missing_identifier_is_a_schema_error() {
        let ds = dataset(
            r#"{"id": "bommen", "identifier": "nummer", "tables": [{"id": "bommen", "fields": [
                {"name": "id", "type": "integer"}
            ]}]}"#,
        );
        let err = ResourceDefinition::from_schema(Arc::clone(&ds), &ds.tables[0]).expect_err("invalid");
        assert!(matches!(err, SchemaError::MissingIdentifier { field, .. } if field == "nummer"));
    }

    #[test]
    fn temporal_tables_need_dimension_fields() {
        let ds = dataset(
            r#"{"id": "gebieden", "identifier": "identificatie",
                "temporal": {"identifier": "volgnummer", "dimensions": {"geldigOp": ["beginGeldigheid", "eindGeldigheid"]}},
                "tables": [{"id": "buurten", "fields": [
                    {"name": "id", "type": "string"},
                    {"name": "identificatie", "type": "string"},
                    {"name": "volgnummer", "type": "integer"},
                    {"name": "beginGeldigheid", "type": "date"}
                ]}]}"#,
        );
        let err = ResourceDefinition::from_schema(Arc::clone(&ds), &ds.tables[0]).expect_err("invalid");
        assert!(matches!(err, SchemaError::MissingTemporalField { field, .. } if field == "eindGeldigheid"));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let ds = dataset(
            r#"{"id": "x", "tables": [{"id": "t", "fields": [
                {"name": "id", "type": "integer"}, {"name": "id", "type": "string"}
            ]}]}"#,
        );
        let err = ResourceDefinition::from_schema(Arc::clone(&ds), &ds.tables[0]).expect_err("invalid");
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn remote_endpoint_joins_table_name() {
        let ds = dataset(
            r#"{"id": "brp", "remote": {"url": "https://upstream.example/api/"},
                "tables": [{"id": "ingeschrevenpersonen", "fields": [{"name": "id", "type": "string"}]}]}"#,
        );
        let resource = ResourceDefinition::from_schema(Arc::clone(&ds), &ds.tables[0]).expect("resource");
        assert_eq!(
            resource.backend(),
            &Backend::Remote {
                endpoint: "https://upstream.example/api/ingeschrevenpersonen/".into()
            }
        );
    }
}
