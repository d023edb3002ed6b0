//! Relational store abstraction.
//!
//! The API layer never talks to a database driver directly; it hands a
//! [`Query`] to a [`RowStore`]. [`MemoryStore`] evaluates queries in process
//! with the same three-valued NULL semantics a SQL engine applies.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::crs::{Crs, geometry_contains};
use crate::error::{Error, Result};
use crate::naming::to_snake_case;
use crate::query::{CompareOp, GeoPoint, Predicate, Query, like_match};

/// One row, keyed by store column name.
pub type Row = Map<String, Value>;

/// Identifies a table within a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    /// Dataset id.
    pub dataset: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Creates a table reference.
    #[must_use]
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Returns the physical table name (`<dataset>_<table>` in snake case).
    #[must_use]
    pub fn db_table(&self) -> String {
        format!("{}_{}", to_snake_case(&self.dataset), to_snake_case(&self.table))
    }
}

/// A window of matching rows plus the total match count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Rows inside the requested window.
    pub rows: Vec<Row>,
    /// Number of rows matching the filter, ignoring the window.
    pub total: usize,
}

/// Relational store contract.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Executes `query` and returns the requested window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the backend fails.
    async fn fetch(&self, query: &Query) -> Result<Page>;

    /// Lists the tables the store currently holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when introspection fails.
    async fn table_names(&self) -> Result<Vec<TableRef>>;
}

/// In-memory row store.
///
/// Unknown tables read as empty.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<TableRef, Vec<Row>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row to `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the lock is poisoned.
    pub fn insert(&self, table: &TableRef, row: Row) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        tables.entry(table.clone()).or_default().push(row);
        Ok(())
    }

    /// Replaces every row of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the lock is poisoned.
    pub fn replace_table(&self, table: &TableRef, rows: Vec<Row>) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        tables.insert(table.clone(), rows);
        Ok(())
    }

    /// Loads `table` from a JSON array of objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when the document is not an array of
    /// objects.
    pub fn seed_from_json(&self, table: &TableRef, document: &str) -> Result<usize> {
        let rows: Vec<Row> = serde_json::from_str(document)?;
        let count = rows.len();
        self.replace_table(table, rows)?;
        Ok(count)
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn fetch(&self, query: &Query) -> Result<Page> {
        let tables = self.tables.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let mut matching: Vec<&Row> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| evaluate(&query.filter, row) == Some(true))
                    .collect()
            })
            .unwrap_or_default();

        if !query.order.is_empty() {
            matching.sort_by(|a, b| {
                query
                    .order
                    .iter()
                    .map(|key| {
                        let ordering = compare_nullable(column(a, &key.column), column(b, &key.column));
                        if key.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let total = matching.len();
        let rows = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(Page { rows, total })
    }

    async fn table_names(&self) -> Result<Vec<TableRef>> {
        let tables = self.tables.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        let mut names: Vec<TableRef> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// Predicate evaluation (SQL three-valued logic: None = UNKNOWN)
// ============================================================================

fn column<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.get(name).filter(|v| !v.is_null())
}

fn evaluate(predicate: &Predicate, row: &Row) -> Option<bool> {
    match predicate {
        Predicate::True => Some(true),
        Predicate::Compare {
            column: name,
            op,
            value,
            date_only,
        } => {
            let left = column(row, name)?;
            if value.is_null() {
                return None;
            }
            let ordering = if *date_only {
                let day = left.as_str().map(|s| s.get(..10).unwrap_or(s))?;
                compare_values(&Value::String(day.to_string()), value)?
            } else {
                compare_values(left, value)?
            };
            Some(match op {
                CompareOp::Eq => ordering.is_eq(),
                CompareOp::NotEq => ordering.is_ne(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Lte => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Gte => ordering.is_ge(),
            })
        }
        Predicate::IsNull {
            column: name,
            negated,
        } => Some(column(row, name).is_none() == !negated),
        Predicate::Like {
            column: name,
            pattern,
        } => {
            let value = column(row, name)?;
            let text = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            Some(like_match(&text, pattern))
        }
        Predicate::In {
            column: name,
            values,
        } => {
            let left = column(row, name)?;
            let mut unknown = false;
            for candidate in values {
                match compare_values(left, candidate) {
                    Some(Ordering::Equal) => return Some(true),
                    None if candidate.is_null() => unknown = true,
                    _ => {}
                }
            }
            if unknown { None } else { Some(false) }
        }
        Predicate::IsEmpty {
            column: name,
            empty,
        } => {
            let is_empty = column(row, name).map(|v| v.as_str() == Some(""));
            Some((is_empty == Some(true)) == *empty)
        }
        Predicate::ArrayContains {
            column: name,
            values,
        } => {
            let items = column(row, name)?.as_array()?;
            Some(
                values
                    .iter()
                    .all(|wanted| items.iter().any(|item| item.as_str() == Some(wanted))),
            )
        }
        Predicate::GeoContains {
            column: name,
            point,
        } => {
            let geometry = column(row, name)?;
            let (x, y) = to_storage(point);
            Some(geometry_contains(geometry, x, y))
        }
        Predicate::And(parts) => {
            let mut result = Some(true);
            for part in parts {
                match evaluate(part, row) {
                    Some(false) => return Some(false),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        Predicate::Or(parts) => {
            let mut result = Some(false);
            for part in parts {
                match evaluate(part, row) {
                    Some(true) => return Some(true),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
    }
}

fn to_storage(point: &GeoPoint) -> (f64, f64) {
    match Crs::from_srid(point.srid) {
        Some(crs) => crs.transform_point(Crs::STORAGE, point.x, point.y),
        None => (point.x, point.y),
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::String(b)) => b.parse::<bool>().ok().map(|b| a.cmp(&b)),
        _ => None,
    }
}

/// Ascending order with NULLs last.
fn compare_nullable(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().expect("object")
    }

    fn seeded() -> (MemoryStore, TableRef) {
        let store = MemoryStore::new();
        let table = TableRef::new("afvalwegingen", "containers");
        for r in [
            json!({"id": 1, "serienummer": "foo%bar", "eigenaar_naam": "Dataservices", "datum_creatie": "2021-01-03"}),
            json!({"id": 2, "serienummer": "fooxbar", "eigenaar_naam": "", "datum_creatie": "2021-01-05T10:00:00"}),
            json!({"id": 3, "serienummer": "foo_bar", "eigenaar_naam": null, "datum_creatie": null}),
        ] {
            store.insert(&table, row(r)).expect("insert");
        }
        (store, table)
    }

    async fn ids(store: &MemoryStore, query: Query) -> Vec<i64> {
        store
            .fetch(&query)
            .await
            .expect("fetch")
            .rows
            .iter()
            .filter_map(|r| r["id"].as_i64())
            .collect()
    }

    #[test]
    fn db_table_is_snake_case() {
        assert_eq!(TableRef::new("hcbrk", "kadastraleObjecten").db_table(), "hcbrk_kadastrale_objecten");
    }

    #[tokio::test]
    async fn unknown_table_reads_empty() {
        let store = MemoryStore::new();
        let page = store
            .fetch(&Query::all(TableRef::new("x", "y")))
            .await
            .expect("fetch");
        assert_eq!(page, Page::default());
    }

    #[tokio::test]
    async fn comparisons_with_null_are_unknown() {
        let (store, table) = seeded();
        let query = Query::all(table).with_filter(Predicate::Compare {
            column: "eigenaar_naam".into(),
            op: CompareOp::NotEq,
            value: json!("Dataservices"),
            date_only: false,
        });
        assert_eq!(ids(&store, query).await, vec![2]);
    }

    #[tokio::test]
    async fn isempty_false_includes_null_rows() {
        let (store, table) = seeded();
        let empty = Query::all(table.clone()).with_filter(Predicate::IsEmpty {
            column: "eigenaar_naam".into(),
            empty: true,
        });
        let not_empty = Query::all(table).with_filter(Predicate::IsEmpty {
            column: "eigenaar_naam".into(),
            empty: false,
        });
        assert_eq!(ids(&store, empty).await, vec![2]);
        assert_eq!(ids(&store, not_empty).await, vec![1, 3]);
    }

    #[tokio::test]
    async fn date_only_compares_the_day() {
        let (store, table) = seeded();
        let query = Query::all(table).with_filter(Predicate::Compare {
            column: "datum_creatie".into(),
            op: CompareOp::Lte,
            value: json!("2021-01-05"),
            date_only: true,
        });
        assert_eq!(ids(&store, query).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn sorts_with_nulls_last_ascending_and_first_descending() {
        let (store, table) = seeded();
        let asc = Query::all(table.clone()).with_order(vec![SortKey::asc("datum_creatie")]);
        let desc = Query::all(table).with_order(vec![SortKey::desc("datum_creatie")]);
        assert_eq!(ids(&store, asc).await, vec![1, 2, 3]);
        assert_eq!(ids(&store, desc).await, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn window_keeps_total() {
        let (store, table) = seeded();
        let page = store
            .fetch(&Query::all(table).with_window(1, 1))
            .await
            .expect("fetch");
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn lists_table_names() {
        let (store, table) = seeded();
        assert_eq!(store.table_names().await.expect("names"), vec![table]);
    }
}
