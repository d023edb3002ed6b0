//! Dataset schema model.
//!
//! Schema documents are JSON, one dataset per document. Parsing produces an
//! immutable [`DatasetSchema`]; a changed document is reloaded wholesale.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::to_snake_case;
use crate::scopes::ScopeRequirement;

/// Name of the primary key column in every table.
pub const PRIMARY_KEY: &str = "id";

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free text.
    String,
    /// Whole number.
    Integer,
    /// Floating point number.
    Number,
    /// Boolean flag.
    Boolean,
    /// Calendar date.
    Date,
    /// Timestamp.
    #[serde(rename = "datetime")]
    DateTime,
    /// Time of day.
    Time,
    /// Array of strings.
    Array,
    /// GeoJSON geometry stored in RD New.
    Geometry,
    /// Nested JSON object.
    Object,
}

impl FieldType {
    /// Returns the schema name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Array => "array",
            Self::Geometry => "geometry",
            Self::Object => "object",
        }
    }
}

/// A single field in a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    /// External (camelCase) field name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field may hold NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Scopes required to read this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ScopeRequirement>,
    /// Forward relation target: `table` or `dataset:table`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

const fn default_nullable() -> bool {
    true
}

impl FieldSchema {
    /// Returns the internal store column name.
    #[must_use]
    pub fn column(&self) -> String {
        to_snake_case(&self.name)
    }

    /// Returns true when this field is a forward relation.
    #[must_use]
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Resolves the relation target to `(dataset, table)`.
    ///
    /// A bare table name refers to a table in `own_dataset`.
    #[must_use]
    pub fn relation_target(&self, own_dataset: &str) -> Option<(String, String)> {
        let relation = self.relation.as_deref()?;
        Some(match relation.split_once(':') {
            Some((dataset, table)) => (dataset.to_string(), table.to_string()),
            None => (own_dataset.to_string(), relation.to_string()),
        })
    }
}

/// A one-to-many relation from another table back to this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseRelationSchema {
    /// External name of the relation on this table.
    pub name: String,
    /// Table (in the same dataset) holding the foreign key.
    pub table: String,
    /// Forward relation field on `table` pointing back here.
    pub field: String,
}

/// A table within a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name, used in URLs.
    pub id: String,
    /// Scopes required to access this table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ScopeRequirement>,
    /// Fields in declaration order.
    pub fields: Vec<FieldSchema>,
    /// Reverse (one-to-many) relations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reverse_relations: Vec<ReverseRelationSchema>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableSchema {
    /// Looks up a field by external name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true when any field holds a geometry.
    #[must_use]
    pub fn has_geometry(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.field_type == FieldType::Geometry)
    }

    /// Iterates the forward relation fields.
    pub fn relations(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.is_relation())
    }
}

/// Temporal configuration of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalConfig {
    /// Field holding the version number (e.g. `volgnummer`).
    pub identifier: String,
    /// Dimension query keys mapped to their `[start, end]` fields.
    #[serde(default)]
    pub dimensions: BTreeMap<String, [String; 2]>,
}

/// Upstream location of a remote-backed dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSchema {
    /// Base URL; table endpoints are `url` joined with `<table>/`.
    pub url: String,
}

/// A parsed dataset schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// Dataset id, used in URLs.
    pub id: String,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Field holding the object identifier.
    #[serde(default = "default_identifier")]
    pub identifier: String,
    /// Scopes required to access any table of this dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ScopeRequirement>,
    /// Temporal configuration, absent for non-temporal datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalConfig>,
    /// Upstream service, absent for locally stored datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSchema>,
    /// Tables in declaration order.
    pub tables: Vec<TableSchema>,
}

fn default_identifier() -> String {
    PRIMARY_KEY.to_string()
}

impl DatasetSchema {
    /// Parses a schema document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when the document is not valid JSON or
    /// does not describe a dataset, and [`Error::InvalidInput`] when it has an
    /// empty id.
    pub fn from_json(document: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(document)?;
        if schema.id.trim().is_empty() {
            return Err(Error::InvalidInput("dataset id must not be empty".into()));
        }
        Ok(schema)
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn table(&self, id: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Returns true when the dataset declares temporal semantics.
    #[must_use]
    pub fn is_temporal(&self) -> bool {
        self.temporal.is_some()
    }

    /// Returns true when the dataset is served by an upstream service.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEBIEDEN: &str = r#"{
        "id": "gebieden",
        "identifier": "identificatie",
        "temporal": {
            "identifier": "volgnummer",
            "dimensions": {"geldigOp": ["beginGeldigheid", "eindGeldigheid"]}
        },
        "tables": [{
            "id": "buurten",
            "fields": [
                {"name": "id", "type": "string", "nullable": false},
                {"name": "identificatie", "type": "string"},
                {"name": "volgnummer", "type": "integer"},
                {"name": "beginGeldigheid", "type": "date"},
                {"name": "eindGeldigheid", "type": "date"},
                {"name": "ligtInWijk", "type": "string", "relation": "wijken"},
                {"name": "geometrie", "type": "geometry", "auth": ["GEBIEDEN/GEO", "GEBIEDEN/RO"]}
            ]
        }]
    }"#;

    #[test]
    fn parses_temporal_dataset() {
        let schema = DatasetSchema::from_json(GEBIEDEN).expect("parse");
        assert!(schema.is_temporal());
        assert!(!schema.is_remote());
        let temporal = schema.temporal.as_ref().expect("temporal");
        assert_eq!(temporal.identifier, "volgnummer");
        assert_eq!(
            temporal.dimensions["geldigOp"],
            ["beginGeldigheid".to_string(), "eindGeldigheid".to_string()]
        );

        let buurten = schema.table("buurten").expect("table");
        assert!(buurten.has_geometry());
        assert!(!buurten.field("id").expect("id").nullable);
        assert!(buurten.field("identificatie").expect("field").nullable);
        assert_eq!(
            buurten.field("beginGeldigheid").expect("field").column(),
            "begin_geldigheid"
        );
    }

    #[test]
    fn relation_targets_resolve_against_own_dataset() {
        let schema = DatasetSchema::from_json(GEBIEDEN).expect("parse");
        let field = schema
            .table("buurten")
            .and_then(|t| t.field("ligtInWijk"))
            .expect("field");
        assert_eq!(
            field.relation_target("gebieden"),
            Some(("gebieden".to_string(), "wijken".to_string()))
        );

        let cross = FieldSchema {
            relation: Some("bag:panden".into()),
            ..field.clone()
        };
        assert_eq!(
            cross.relation_target("gebieden"),
            Some(("bag".to_string(), "panden".to_string()))
        );
    }

    #[test]
    fn identifier_defaults_to_primary_key() {
        let schema = DatasetSchema::from_json(
            r#"{"id": "bommen", "tables": [{"id": "bommen", "fields": [{"name": "id", "type": "integer"}]}]}"#,
        )
        .expect("parse");
        assert_eq!(schema.identifier, "id");
        assert!(schema.temporal.is_none());
    }

    #[test]
    fn rejects_unknown_field_type() {
        let err = DatasetSchema::from_json(
            r#"{"id": "x", "tables": [{"id": "t", "fields": [{"name": "id", "type": "blob"}]}]}"#,
        )
        .expect_err("unknown type");
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn rejects_empty_dataset_id() {
        let err = DatasetSchema::from_json(r#"{"id": " ", "tables": []}"#).expect_err("empty id");
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
