//! `_sort` parameter parsing.

use std::collections::BTreeSet;

use dso_core::query::SortKey;
use dso_core::schema::FieldType;
use dso_registry::ResourceDefinition;

use crate::error::FilterError;

/// Sort parameter names, in order of preference.
pub const SORT_PARAMS: [&str; 2] = ["_sort", "sorteer"];

fn sortable(field_type: FieldType) -> bool {
    !matches!(
        field_type,
        FieldType::Geometry | FieldType::Object | FieldType::Array
    )
}

/// Parses `_sort=field,-field2` (or legacy `sorteer`) into sort keys.
///
/// Names are the external camelCase field names; a leading `-` sorts
/// descending. Returns no keys when neither parameter is present.
///
/// # Errors
///
/// - [`FilterError::Invalid`] listing every unknown or unsortable name
/// - [`FilterError::Forbidden`] when a name is in `hidden`
pub fn parse_ordering(
    resource: &ResourceDefinition,
    params: &[(String, String)],
    hidden: &BTreeSet<String>,
) -> Result<Vec<SortKey>, FilterError> {
    let Some((param, raw)) = SORT_PARAMS
        .iter()
        .find_map(|name| params.iter().find(|(k, _)| k == name))
    else {
        return Ok(Vec::new());
    };

    let mut keys = Vec::new();
    let mut invalid = BTreeSet::new();
    let mut forbidden = None;

    for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (name, descending) = match term.strip_prefix('-') {
            Some(name) => (name, true),
            None => (term, false),
        };
        match resource.field(name) {
            Some(field) if sortable(field.field_type) => {
                if hidden.contains(name) {
                    forbidden.get_or_insert_with(|| name.to_string());
                }
                let column = field.column();
                keys.push(if descending {
                    SortKey::desc(column)
                } else {
                    SortKey::asc(column)
                });
            }
            _ => {
                invalid.insert(name.to_string());
            }
        }
    }

    if !invalid.is_empty() {
        let names: Vec<String> = invalid.into_iter().collect();
        return Err(FilterError::invalid(
            param.clone(),
            format!("Invalid sort fields: {}", names.join(", ")),
        ));
    }
    if let Some(field) = forbidden {
        return Err(FilterError::Forbidden { field });
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dso_core::schema::DatasetSchema;

    fn containers() -> ResourceDefinition {
        let ds = Arc::new(
            DatasetSchema::from_json(
                r#"{"id": "afvalwegingen", "tables": [{"id": "containers", "fields": [
                    {"name": "id", "type": "integer"},
                    {"name": "datumCreatie", "type": "date"},
                    {"name": "eigenaarNaam", "type": "string"},
                    {"name": "geometry", "type": "geometry"}
                ]}]}"#,
            )
            .unwrap(),
        );
        ResourceDefinition::from_schema(Arc::clone(&ds), &ds.tables[0]).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn camel_case_names_map_to_columns() {
        let keys = parse_ordering(
            &containers(),
            &params(&[("_sort", "-datumCreatie,id")]),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(keys, vec![SortKey::desc("datum_creatie"), SortKey::asc("id")]);
    }

    #[test]
    fn snake_case_names_are_rejected() {
        let err = parse_ordering(
            &containers(),
            &params(&[("_sort", "datum_creatie,-foo,geometry")]),
            &BTreeSet::new(),
        )
        .unwrap_err();
        let invalid = err.invalid_params();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].name, "_sort");
        assert_eq!(invalid[0].reason, "Invalid sort fields: datum_creatie, foo, geometry");
    }

    #[test]
    fn legacy_sorteer_is_used_when_sort_is_absent() {
        let keys = parse_ordering(
            &containers(),
            &params(&[("sorteer", "id")]),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(keys, vec![SortKey::asc("id")]);
    }

    #[test]
    fn hidden_fields_are_forbidden() {
        let hidden = BTreeSet::from(["eigenaarNaam".to_string()]);
        let err = parse_ordering(&containers(), &params(&[("_sort", "eigenaarNaam")]), &hidden)
            .unwrap_err();
        assert_eq!(
            err,
            FilterError::Forbidden {
                field: "eigenaarNaam".into()
            }
        );
    }

    #[test]
    fn absent_parameter_means_no_ordering() {
        let keys = parse_ordering(&containers(), &[], &BTreeSet::new()).unwrap();
        assert!(keys.is_empty());
    }
}
