//! Per-resource filter sets.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use dso_core::crs::Crs;
use dso_core::query::{CompareOp, Predicate};
use dso_registry::ResourceDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FilterError, InvalidParam};
use crate::geometry::parse_point;
use crate::lookup::{FilterKind, Lookup, split_param};
use crate::values;
use crate::wildcard::wildcard_to_like;

/// Query parameters with a meaning of their own; never treated as filters.
pub const RESERVED_PARAMS: [&str; 9] = [
    "_sort",
    "sorteer",
    "_expand",
    "_expandScope",
    "_fields",
    "_format",
    "page",
    "_pageSize",
    "page_size",
];

/// How repeated parameters (`?kleur=rood&kleur=groen`) are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValueOperator {
    /// Every value must match.
    #[default]
    And,
    /// Any value may match.
    Or,
}

impl MultiValueOperator {
    /// Combines the predicates of one repeated parameter.
    ///
    /// An empty list is a pass-through.
    #[must_use]
    pub fn combine(self, parts: Vec<Predicate>) -> Predicate {
        match self {
            Self::And => Predicate::and(parts),
            Self::Or => Predicate::or(parts),
        }
    }
}

impl FromStr for MultiValueOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            other => Err(format!("expected 'and' or 'or', got '{other}'")),
        }
    }
}

/// Per-request settings for [`FilterSet::apply`].
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Combination of repeated parameters.
    pub multi_value: MultiValueOperator,
    /// CRS negotiated for the request; steers point resolution.
    pub accept_crs: Option<Crs>,
    /// External names of fields the caller may not read.
    pub hidden_fields: BTreeSet<String>,
}

/// A documented filter parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParameter {
    /// Parameter name, e.g. `naam[not]`.
    pub name: String,
    /// Value type.
    pub kind: &'static str,
}

#[derive(Debug, Clone)]
struct FieldFilter {
    column: String,
    kind: FilterKind,
    nullable: bool,
}

#[derive(Debug, Clone)]
struct RangeFilter {
    start: String,
    end: String,
}

/// The filters available on one resource.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    fields: BTreeMap<String, FieldFilter>,
    ranges: BTreeMap<String, RangeFilter>,
}

impl FilterSet {
    /// Derives filters from the resource's fields and temporal dimensions.
    #[must_use]
    pub fn for_resource(resource: &ResourceDefinition) -> Self {
        let fields = resource
            .fields()
            .iter()
            .filter_map(|field| {
                let kind = FilterKind::for_field(field)?;
                Some((
                    field.name.clone(),
                    FieldFilter {
                        column: field.column(),
                        kind,
                        nullable: field.nullable,
                    },
                ))
            })
            .collect();

        let ranges = resource
            .temporal()
            .map(|temporal| {
                temporal
                    .dimensions
                    .iter()
                    .filter_map(|(key, [start, end])| {
                        let start = resource.field(start)?.column();
                        let end = resource.field(end)?.column();
                        Some((key.clone(), RangeFilter { start, end }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { fields, ranges }
    }

    /// Returns true when `name` is a filterable field or dimension.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name) || self.ranges.contains_key(name)
    }

    /// Lists every accepted parameter.
    #[must_use]
    pub fn parameters(&self) -> Vec<FilterParameter> {
        let mut parameters = Vec::new();
        for (name, filter) in &self.fields {
            let default = filter.kind.default_lookup();
            for lookup in filter.kind.lookups() {
                let name = if *lookup == default {
                    name.clone()
                } else {
                    format!("{name}[{lookup}]")
                };
                parameters.push(FilterParameter {
                    name,
                    kind: filter.kind.as_str(),
                });
            }
        }
        for name in self.ranges.keys() {
            parameters.push(FilterParameter {
                name: name.clone(),
                kind: FilterKind::Date.as_str(),
            });
        }
        parameters
    }

    /// Builds the predicate for `params`.
    ///
    /// Reserved and unknown plain parameters are ignored. Repeated keys are
    /// combined with `options.multi_value`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::Forbidden`] when a filter targets a hidden field
    /// - [`FilterError::Invalid`] listing every malformed parameter
    pub fn apply(
        &self,
        params: &[(String, String)],
        options: &FilterOptions,
    ) -> Result<Predicate, FilterError> {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, value) in params {
            if !RESERVED_PARAMS.contains(&key.as_str()) {
                grouped.entry(key.as_str()).or_default().push(value.as_str());
            }
        }

        let mut parts = Vec::with_capacity(grouped.len());
        let mut invalid = Vec::new();

        for (key, raw_values) in grouped {
            let (name, lookup) = split_param(key);

            if let (Some(range), None) = (self.ranges.get(name), lookup) {
                let mut built = Vec::with_capacity(raw_values.len());
                for raw in raw_values {
                    match range.build(raw) {
                        Ok(predicate) => built.push(predicate),
                        Err(reason) => invalid.push(InvalidParam::new(key, reason)),
                    }
                }
                parts.push(options.multi_value.combine(built));
                continue;
            }

            let Some(filter) = self.fields.get(name) else {
                if lookup.is_some() {
                    invalid.push(InvalidParam::new(
                        key,
                        format!("Unknown filter field '{name}'."),
                    ));
                }
                continue;
            };

            if options.hidden_fields.contains(name) {
                return Err(FilterError::Forbidden {
                    field: name.to_string(),
                });
            }

            let lookup = match lookup {
                None => filter.kind.default_lookup(),
                Some(raw) => match raw.parse::<Lookup>() {
                    Ok(lookup) if filter.kind.supports(lookup) => lookup,
                    _ => {
                        invalid.push(InvalidParam::new(
                            key,
                            format!("Lookup '{raw}' is not supported for field '{name}'."),
                        ));
                        continue;
                    }
                },
            };

            let mut built = Vec::with_capacity(raw_values.len());
            for raw in raw_values {
                match filter.build(lookup, raw, options.accept_crs) {
                    Ok(predicate) => built.push(predicate),
                    Err(reason) => invalid.push(InvalidParam::new(key, reason)),
                }
            }
            parts.push(options.multi_value.combine(built));
        }

        if !invalid.is_empty() {
            tracing::debug!(invalid = invalid.len(), "rejected filter parameters");
            return Err(FilterError::Invalid(invalid));
        }
        Ok(Predicate::and(parts))
    }
}

impl FieldFilter {
    fn build(&self, lookup: Lookup, raw: &str, crs: Option<Crs>) -> Result<Predicate, String> {
        match lookup {
            Lookup::Exact => self.exact(raw),
            Lookup::Wildcard => Ok(Predicate::Like {
                column: self.column.clone(),
                pattern: wildcard_to_like(raw),
            }),
            Lookup::Not => self.not_equal(raw),
            Lookup::IsEmpty => Ok(Predicate::IsEmpty {
                column: self.column.clone(),
                empty: values::boolean(raw)?,
            }),
            Lookup::Contains => parse_point(raw, crs).map(|point| Predicate::GeoContains {
                column: self.column.clone(),
                point,
            }),
            Lookup::Lt => self.compare(CompareOp::Lt, raw),
            Lookup::Lte => self.compare(CompareOp::Lte, raw),
            Lookup::Gt => self.compare(CompareOp::Gt, raw),
            Lookup::Gte => self.compare(CompareOp::Gte, raw),
            Lookup::In => {
                let candidates = values::csv(raw)
                    .iter()
                    .map(|value| self.scalar(value).map(|(value, _)| value))
                    .collect::<Result<Vec<_>, _>>()?;
                if candidates.is_empty() {
                    return Ok(Predicate::True);
                }
                Ok(Predicate::In {
                    column: self.column.clone(),
                    values: candidates,
                })
            }
        }
    }

    /// Parses one value; the flag marks bare dates for date-time fields.
    fn scalar(&self, raw: &str) -> Result<(Value, bool), String> {
        Ok(match self.kind {
            FilterKind::Text | FilterKind::Relation => (Value::String(raw.to_string()), false),
            FilterKind::Integer => (values::integer(raw)?, false),
            FilterKind::Number => (values::number(raw)?, false),
            FilterKind::Time => (values::time(raw)?, false),
            FilterKind::Date => (values::date(raw)?, false),
            FilterKind::DateTime => {
                let parsed = values::flex_datetime(raw)?;
                (Value::String(parsed.value), parsed.date_only)
            }
            FilterKind::Boolean => (Value::Bool(values::boolean(raw)?), false),
            FilterKind::Array | FilterKind::Geometry => {
                return Err(format!("A {} field cannot be compared.", self.kind.as_str()));
            }
        })
    }

    fn exact(&self, raw: &str) -> Result<Predicate, String> {
        match self.kind {
            FilterKind::Text => Ok(Predicate::Like {
                column: self.column.clone(),
                pattern: wildcard_to_like(raw),
            }),
            FilterKind::Array => Ok(Predicate::ArrayContains {
                column: self.column.clone(),
                values: values::csv(raw),
            }),
            _ => self.compare(CompareOp::Eq, raw),
        }
    }

    fn compare(&self, op: CompareOp, raw: &str) -> Result<Predicate, String> {
        let (value, date_only) = self.scalar(raw)?;
        Ok(Predicate::Compare {
            column: self.column.clone(),
            op,
            value,
            date_only,
        })
    }

    /// `field[not]=v`. NULL rows also match on nullable fields, and a blank
    /// value means IS NOT NULL.
    fn not_equal(&self, raw: &str) -> Result<Predicate, String> {
        if raw.trim().is_empty() {
            return Ok(Predicate::IsNull {
                column: self.column.clone(),
                negated: true,
            });
        }
        let not_equal = self.compare(CompareOp::NotEq, raw)?;
        if !self.nullable {
            return Ok(not_equal);
        }
        Ok(Predicate::or(vec![
            Predicate::IsNull {
                column: self.column.clone(),
                negated: false,
            },
            not_equal,
        ]))
    }
}

impl RangeFilter {
    /// `(start <= v OR start IS NULL) AND (end > v OR end IS NULL)`.
    ///
    /// A blank value or `*` is a pass-through.
    fn build(&self, raw: &str) -> Result<Predicate, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" {
            return Ok(Predicate::True);
        }
        let value = Value::String(values::flex_datetime(raw)?.value);
        let bound = |column: &str, op| {
            Predicate::or(vec![
                Predicate::Compare {
                    column: column.to_string(),
                    op,
                    value: value.clone(),
                    date_only: false,
                },
                Predicate::IsNull {
                    column: column.to_string(),
                    negated: false,
                },
            ])
        };
        Ok(Predicate::and(vec![
            bound(&self.start, CompareOp::Lte),
            bound(&self.end, CompareOp::Gt),
        ]))
    }
}
