//! Lookups and the semantic filter kinds they apply to.

use std::fmt;
use std::str::FromStr;

use dso_core::schema::{FieldSchema, FieldType};

/// The bracketed operator of a `field[lookup]` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lookup {
    /// Default lookup of a plain `field=value` parameter.
    Exact,
    /// Not equal; also matches NULL on nullable fields.
    Not,
    /// Empty string test.
    IsEmpty,
    /// Geometry contains a point.
    Contains,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Wildcard pattern match.
    Wildcard,
    /// Membership in a comma-separated list.
    In,
}

impl Lookup {
    /// Returns the name used inside the brackets.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Not => "not",
            Self::IsEmpty => "isempty",
            Self::Contains => "contains",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Wildcard => "wildcard",
            Self::In => "in",
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown lookup name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLookup(pub String);

impl FromStr for Lookup {
    type Err = UnknownLookup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exact" => Self::Exact,
            "not" => Self::Not,
            "isempty" => Self::IsEmpty,
            "contains" => Self::Contains,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "wildcard" | "like" => Self::Wildcard,
            "in" => Self::In,
            other => return Err(UnknownLookup(other.to_string())),
        })
    }
}

/// Splits `field[lookup]` into its parts; plain names have no lookup.
///
/// ```rust
/// use dso_filters::split_param;
///
/// assert_eq!(split_param("naam[not]"), ("naam", Some("not")));
/// assert_eq!(split_param("naam"), ("naam", None));
/// ```
#[must_use]
pub fn split_param(key: &str) -> (&str, Option<&str>) {
    match key.strip_suffix(']').and_then(|k| k.split_once('[')) {
        Some((field, lookup)) => (field, Some(lookup)),
        None => (key, None),
    }
}

/// The semantic type of a filterable field.
///
/// Each kind accepts a fixed set of lookups; the set replaces a per-type
/// filter class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Free text; the default lookup is a wildcard match.
    Text,
    /// Whole numbers.
    Integer,
    /// Decimal numbers.
    Number,
    /// Time of day.
    Time,
    /// Calendar date.
    Date,
    /// Date and time; bare dates compare against the date part.
    DateTime,
    /// `true`/`false`.
    Boolean,
    /// Array of strings, filtered by comma-separated values.
    Array,
    /// Geometry, filtered by point containment.
    Geometry,
    /// Forward relation; filters the foreign key column.
    Relation,
}

const TEXT: &[Lookup] = &[
    Lookup::Exact,
    Lookup::Wildcard,
    Lookup::Not,
    Lookup::IsEmpty,
    Lookup::In,
];
const ORDERED: &[Lookup] = &[
    Lookup::Exact,
    Lookup::Not,
    Lookup::Lt,
    Lookup::Lte,
    Lookup::Gt,
    Lookup::Gte,
    Lookup::In,
];
const DATES: &[Lookup] = &[
    Lookup::Exact,
    Lookup::Not,
    Lookup::Lt,
    Lookup::Lte,
    Lookup::Gt,
    Lookup::Gte,
];
const BOOLEAN: &[Lookup] = &[Lookup::Exact, Lookup::Not];
const ARRAY: &[Lookup] = &[Lookup::Exact];
const GEOMETRY: &[Lookup] = &[Lookup::Contains];
const RELATION: &[Lookup] = &[Lookup::Exact, Lookup::Not, Lookup::In];

impl FilterKind {
    /// Derives the kind of a field; `object` fields are not filterable.
    #[must_use]
    pub fn for_field(field: &FieldSchema) -> Option<Self> {
        if field.is_relation() {
            return Some(Self::Relation);
        }
        Some(match field.field_type {
            FieldType::String => Self::Text,
            FieldType::Integer => Self::Integer,
            FieldType::Number => Self::Number,
            FieldType::Boolean => Self::Boolean,
            FieldType::Date => Self::Date,
            FieldType::DateTime => Self::DateTime,
            FieldType::Time => Self::Time,
            FieldType::Array => Self::Array,
            FieldType::Geometry => Self::Geometry,
            FieldType::Object => return None,
        })
    }

    /// Returns the lookups this kind accepts.
    #[must_use]
    pub const fn lookups(self) -> &'static [Lookup] {
        match self {
            Self::Text => TEXT,
            Self::Integer | Self::Number | Self::Time => ORDERED,
            Self::Date | Self::DateTime => DATES,
            Self::Boolean => BOOLEAN,
            Self::Array => ARRAY,
            Self::Geometry => GEOMETRY,
            Self::Relation => RELATION,
        }
    }

    /// Returns the lookup used when a parameter has no brackets.
    #[must_use]
    pub const fn default_lookup(self) -> Lookup {
        match self {
            Self::Geometry => Lookup::Contains,
            _ => Lookup::Exact,
        }
    }

    /// Returns true when `lookup` is accepted.
    #[must_use]
    pub fn supports(self, lookup: Lookup) -> bool {
        self.lookups().contains(&lookup)
    }

    /// Returns a short name for documentation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Time => "time",
            Self::Date => "date",
            Self::DateTime => "date-time",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Geometry => "geometry",
            Self::Relation => "relation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(document: &str) -> FieldSchema {
        serde_json::from_str(document).unwrap()
    }

    #[test]
    fn parses_lookup_names() {
        assert_eq!("isempty".parse::<Lookup>(), Ok(Lookup::IsEmpty));
        assert_eq!("like".parse::<Lookup>(), Ok(Lookup::Wildcard));
        assert!("startswith".parse::<Lookup>().is_err());
    }

    #[test]
    fn splits_bracketed_params() {
        assert_eq!(split_param("datumCreatie[gte]"), ("datumCreatie", Some("gte")));
        assert_eq!(split_param("naam[]"), ("naam", Some("")));
        assert_eq!(split_param("naam[not"), ("naam[not", None));
    }

    #[test]
    fn relations_win_over_field_type() {
        let relation = field(r#"{"name": "cluster", "type": "string", "relation": "clusters"}"#);
        assert_eq!(FilterKind::for_field(&relation), Some(FilterKind::Relation));
        assert!(!FilterKind::Relation.supports(Lookup::Wildcard));
    }

    #[test]
    fn objects_are_not_filterable() {
        let object = field(r#"{"name": "adres", "type": "object"}"#);
        assert_eq!(FilterKind::for_field(&object), None);
    }

    #[test]
    fn geometry_defaults_to_contains() {
        assert_eq!(FilterKind::Geometry.default_lookup(), Lookup::Contains);
        assert!(!FilterKind::Geometry.supports(Lookup::Exact));
    }
}
