//! Store-level query expressions.
//!
//! The filter engine produces a [`Predicate`] tree and a list of
//! [`SortKey`]s; a [`crate::store::RowStore`] executes them. Predicates follow
//! SQL three-valued logic: a comparison against NULL is unknown, and only rows
//! for which the whole predicate is true are returned.

use std::fmt::Write as _;

use serde_json::Value;

use crate::store::TableRef;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl CompareOp {
    /// Returns the SQL operator.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// A point with the spatial reference it was given in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// EPSG code of `x`/`y`.
    pub srid: u32,
    /// Easting or longitude.
    pub x: f64,
    /// Northing or latitude.
    pub y: f64,
}

/// A boolean expression over the columns of one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    True,
    /// `column <op> value`; with `date_only` the column is truncated to its date.
    Compare {
        /// Store column.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Typed comparison value.
        value: Value,
        /// Compare against the date part of the column only.
        date_only: bool,
    },
    /// `column IS [NOT] NULL`.
    IsNull {
        /// Store column.
        column: String,
        /// Render as `IS NOT NULL`.
        negated: bool,
    },
    /// `column LIKE pattern ESCAPE '\'`.
    Like {
        /// Store column.
        column: String,
        /// Escaped LIKE pattern.
        pattern: String,
    },
    /// `column IN (values)`.
    In {
        /// Store column.
        column: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// `(column = '') IS TRUE` when `empty`, else `(column = '') IS NOT TRUE`.
    IsEmpty {
        /// Store column.
        column: String,
        /// Match empty strings instead of everything else.
        empty: bool,
    },
    /// `column @> values` for array columns.
    ArrayContains {
        /// Store column.
        column: String,
        /// Values that must all be present.
        values: Vec<String>,
    },
    /// Geometry in `column` contains `point`.
    GeoContains {
        /// Store column.
        column: String,
        /// Point to test.
        point: GeoPoint,
    },
    /// Conjunction.
    And(Vec<Predicate>),
    /// Disjunction.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Builds a conjunction, flattening nested conjunctions and dropping
    /// [`Predicate::True`]. An empty conjunction is [`Predicate::True`].
    #[must_use]
    pub fn and(parts: Vec<Self>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Self::True => {}
                Self::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::True,
            1 => flat.pop().unwrap_or(Self::True),
            _ => Self::And(flat),
        }
    }

    /// Builds a disjunction, flattening nested disjunctions.
    ///
    /// An empty input is a pass-through and yields [`Predicate::True`].
    #[must_use]
    pub fn or(parts: Vec<Self>) -> Self {
        if parts.is_empty() || parts.contains(&Self::True) {
            return Self::True;
        }
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Self::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.pop().unwrap_or(Self::True);
        }
        Self::Or(flat)
    }

    /// Shorthand for an equality comparison.
    #[must_use]
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: value.into(),
            date_only: false,
        }
    }

    /// Renders the predicate as a Postgres `WHERE` fragment with `$n` bind
    /// parameters appended to `params`.
    pub fn render_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Self::True => "TRUE".to_string(),
            Self::Compare {
                column,
                op,
                value,
                date_only,
            } => {
                params.push(value.clone());
                let cast = if *date_only { "::date" } else { "" };
                format!("{}{cast} {} ${}", quote(column), op.as_sql(), params.len())
            }
            Self::IsNull { column, negated } => {
                let not = if *negated { " NOT" } else { "" };
                format!("{} IS{not} NULL", quote(column))
            }
            Self::Like { column, pattern } => {
                params.push(Value::String(pattern.clone()));
                format!("{} LIKE ${} ESCAPE '\\'", quote(column), params.len())
            }
            Self::In { column, values } => {
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(value.clone());
                    placeholders.push(format!("${}", params.len()));
                }
                format!("{} IN ({})", quote(column), placeholders.join(", "))
            }
            Self::IsEmpty { column, empty } => {
                let test = if *empty { "IS TRUE" } else { "IS NOT TRUE" };
                format!("({} = '') {test}", quote(column))
            }
            Self::ArrayContains { column, values } => {
                params.push(Value::from(values.clone()));
                format!("{} @> ${}", quote(column), params.len())
            }
            Self::GeoContains { column, point } => {
                params.push(Value::from(point.x));
                params.push(Value::from(point.y));
                let n = params.len();
                format!(
                    "ST_Contains({}, ST_Transform(ST_SetSRID(ST_Point(${}, ${n}), {}), 28992))",
                    quote(column),
                    n - 1,
                    point.srid
                )
            }
            Self::And(parts) => join(parts, " AND ", params),
            Self::Or(parts) => join(parts, " OR ", params),
        }
    }
}

fn join(parts: &[Predicate], separator: &str, params: &mut Vec<Value>) -> String {
    let rendered: Vec<String> = parts.iter().map(|p| p.render_sql(params)).collect();
    format!("({})", rendered.join(separator))
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Store column.
    pub column: String,
    /// Sort descending.
    pub descending: bool,
}

impl SortKey {
    /// Ascending order on `column`.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending order on `column`.
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A complete read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Table to read.
    pub table: TableRef,
    /// Row filter.
    pub filter: Predicate,
    /// Ordering terms, applied left to right.
    pub order: Vec<SortKey>,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Number of matching rows to skip.
    pub offset: usize,
}

impl Query {
    /// Reads every row of `table`.
    #[must_use]
    pub fn all(table: TableRef) -> Self {
        Self {
            table,
            filter: Predicate::True,
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn with_order(mut self, order: Vec<SortKey>) -> Self {
        self.order = order;
        self
    }

    /// Sets limit and offset.
    #[must_use]
    pub fn with_window(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Renders a Postgres `SELECT` with its bind parameters.
    #[must_use]
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {}", quote(&self.table.db_table()));
        if self.filter != Predicate::True {
            let _ = write!(sql, " WHERE {}", self.filter.render_sql(&mut params));
        }
        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|k| {
                    let direction = if k.descending { "DESC" } else { "ASC" };
                    format!("{} {direction}", quote(&k.column))
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", terms.join(", "));
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if self.offset > 0 {
            let _ = write!(sql, " OFFSET {}", self.offset);
        }
        (sql, params)
    }
}

// ============================================================================
// LIKE evaluation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Literal(char),
    One,
    Any,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        tokens.push(match ch {
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            '%' => Token::Any,
            '_' => Token::One,
            other => Token::Literal(other),
        });
    }
    tokens
}

/// Matches `text` against a LIKE pattern using `\` as the escape character.
#[must_use]
pub fn like_match(text: &str, pattern: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(Token::One) => {
                t += 1;
                p += 1;
            }
            Some(Token::Literal(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|tok| *tok == Token::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn like_respects_escapes() {
        assert!(like_match("foo%bar", "foo\\%bar"));
        assert!(!like_match("fooxbar", "foo\\%bar"));
        assert!(like_match("fooxbar", "foo_bar"));
        assert!(like_match("anything", "%"));
        assert!(like_match("abcabd", "%abd"));
        assert!(!like_match("abc", "abcd"));
        assert!(like_match("a\\b", "a\\\\b"));
    }

    fn bommen() -> TableRef {
        TableRef::new("bommen", "bommen")
    }

    #[test]
    fn and_flattens_and_drops_true() {
        let p = Predicate::and(vec![
            Predicate::True,
            Predicate::And(vec![Predicate::equals("a", 1), Predicate::equals("b", 2)]),
            Predicate::equals("c", 3),
        ]);
        assert!(matches!(p, Predicate::And(ref parts) if parts.len() == 3));
        assert_eq!(Predicate::and(vec![]), Predicate::True);
    }

    #[test]
    fn empty_or_is_pass_through() {
        assert_eq!(Predicate::or(vec![]), Predicate::True);
        assert_eq!(Predicate::or(vec![Predicate::equals("a", 1)]), Predicate::equals("a", 1));
    }

    #[test]
    fn renders_not_equal_on_nullable_column() {
        let filter = Predicate::or(vec![
            Predicate::IsNull {
                column: "soort".into(),
                negated: false,
            },
            Predicate::Compare {
                column: "soort".into(),
                op: CompareOp::NotEq,
                value: json!("papier"),
                date_only: false,
            },
        ]);
        let (sql, params) = Query::all(bommen()).with_filter(filter).to_sql();
        assert_eq!(
            sql,
            r#"SELECT * FROM "bommen_bommen" WHERE ("soort" IS NULL OR "soort" != $1)"#
        );
        assert_eq!(params, vec![json!("papier")]);
    }

    #[test]
    fn renders_isempty_with_three_valued_test() {
        let mut params = Vec::new();
        let sql = Predicate::IsEmpty {
            column: "naam".into(),
            empty: false,
        }
        .render_sql(&mut params);
        assert_eq!(sql, r#"("naam" = '') IS NOT TRUE"#);
        assert!(params.is_empty());
    }

    #[test]
    fn renders_order_and_window() {
        let (sql, _) = Query::all(bommen())
            .with_order(vec![SortKey::desc("datum_creatie"), SortKey::asc("id")])
            .with_window(20, 40)
            .to_sql();
        assert_eq!(
            sql,
            r#"SELECT * FROM "bommen_bommen" ORDER BY "datum_creatie" DESC, "id" ASC LIMIT 20 OFFSET 40"#
        );
    }

    #[test]
    fn renders_date_truncated_comparison() {
        let mut params = Vec::new();
        let sql = Predicate::Compare {
            column: "datum_creatie".into(),
            op: CompareOp::Lte,
            value: json!("2024-06-01"),
            date_only: true,
        }
        .render_sql(&mut params);
        assert_eq!(sql, r#""datum_creatie"::date <= $1"#);
    }
}
