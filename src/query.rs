//! Catalog query construction and execution.
//!
//! A [`Query`] is a transport-ignorant record: projected columns, conjunctive
//! conditions, keyed qualifiers, and pagination state. The builder half
//! assembles queries for the common intents (metadata listing, AVU search,
//! subtree restriction); the executor half submits the query through a
//! borrowed connection and follows the continuation cursor until exhaustion.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::envelope::Avu;
use crate::error::GridError;
use crate::grid::Connection;

/// Rows fetched per page. The cursor protocol makes the value invisible to
/// callers; it only bounds the size of a single response.
pub const QUERY_PAGE_SIZE: u32 = 256;

/// Typed catalog column identifiers.
///
/// Data-object and collection metadata columns are distinct variants, so a
/// builder cannot mix them by accident. The serialized form is the wire
/// identifier; [`Column::label`] is the external JSON key used in output
/// rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Column {
    CollName,
    DataName,
    DataSize,
    DataChecksum,
    DataReplNum,
    DataReplStatus,
    MetaDataAttrName,
    MetaDataAttrValue,
    MetaDataAttrUnits,
    MetaCollAttrName,
    MetaCollAttrValue,
    MetaCollAttrUnits,
    UserName,
    UserZone,
    DataAccessName,
    CollAccessName,
}

impl Column {
    /// The JSON key this column's values are published under.
    pub fn label(self) -> &'static str {
        match self {
            Column::CollName => "collection",
            Column::DataName => "data_object",
            Column::DataSize => "size",
            Column::DataChecksum => "checksum",
            Column::DataReplNum => "number",
            Column::DataReplStatus => "valid",
            Column::MetaDataAttrName | Column::MetaCollAttrName => "attribute",
            Column::MetaDataAttrValue | Column::MetaCollAttrValue => "value",
            Column::MetaDataAttrUnits | Column::MetaCollAttrUnits => "units",
            Column::UserName => "owner",
            Column::UserZone => "zone",
            Column::DataAccessName | Column::CollAccessName => "level",
        }
    }
}

/// Condition comparators accepted by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Like,
    NotLike,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
        }
    }

    /// Parse the comparator named in an AVU `operator` property.
    pub fn parse(s: &str) -> Result<Operator, GridError> {
        match s {
            "=" => Ok(Operator::Equals),
            "!=" => Ok(Operator::NotEquals),
            "like" => Ok(Operator::Like),
            "not like" => Ok(Operator::NotLike),
            ">" => Ok(Operator::Greater),
            "<" => Ok(Operator::Less),
            ">=" => Ok(Operator::GreaterOrEqual),
            "<=" => Ok(Operator::LessOrEqual),
            other => Err(GridError::invalid(format!(
                "Invalid query operator '{other}'"
            ))),
        }
    }
}

/// One `(column, operator, literal)` condition; composed conjunctively.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: Column,
    pub operator: Operator,
    pub value: String,
}

/// Escape a literal for embedding in a quoted condition expression.
///
/// Single quotes are doubled, the SQL convention; literals are never
/// rejected.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

impl Condition {
    /// Render the condition as the catalog's `<operator> '<literal>'` form.
    pub fn expr(&self) -> String {
        format!("{} '{}'", self.operator.as_str(), escape_literal(&self.value))
    }
}

/// A built catalog query plus its pagination state.
#[derive(Debug, Clone)]
pub struct Query {
    columns: Vec<Column>,
    conditions: Vec<Condition>,
    qualifiers: BTreeMap<String, String>,
    max_rows: u32,
    cursor: u64,
}

impl Query {
    /// Allocate a query with an empty condition list and a cursor of zero.
    pub fn new(max_rows: u32, columns: &[Column]) -> Query {
        Query {
            columns: columns.to_vec(),
            conditions: Vec::new(),
            qualifiers: BTreeMap::new(),
            max_rows,
            cursor: 0,
        }
    }

    /// Append one condition.
    pub fn push_condition(&mut self, column: Column, operator: Operator, value: impl Into<String>) {
        self.conditions.push(Condition {
            column,
            operator,
            value: value.into(),
        });
    }

    /// Restrict the query to a named zone.
    pub fn with_zone(mut self, zone: &str) -> Query {
        self.qualifiers.insert("zone".to_owned(), zone.to_owned());
        self
    }

    /// Restrict matches to a collection subtree.
    ///
    /// An absolute root yields the pattern `<root>%`; a non-absolute
    /// fragment yields `%<root>%`. Empty roots add no condition.
    pub fn with_subtree(mut self, root: &str) -> Query {
        if root.is_empty() {
            return self;
        }
        let pattern = if root.starts_with('/') {
            format!("{root}%")
        } else {
            format!("%{root}%")
        };
        self.push_condition(Column::CollName, Operator::Like, pattern);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn page_params(&self) -> Value {
        let conditions: Vec<Value> = self
            .conditions
            .iter()
            .map(|c| json!({"column": c.column, "expr": c.expr()}))
            .collect();
        json!({
            "columns": self.columns,
            "conditions": conditions,
            "qualifiers": self.qualifiers,
            "max_rows": self.max_rows,
            "cursor": self.cursor,
        })
    }

    /// Execute the query, collecting pages until the cursor is exhausted.
    ///
    /// Each row becomes an object keyed by the column labels supplied with
    /// the query; empty-string values are elided (this keeps absent units
    /// from producing `"units": ""`). A `NO_ROWS_FOUND` status is normal
    /// termination, not an error. Any other failure carries the backend's
    /// code and the page index at which it occurred.
    pub fn fetch_all(mut self, conn: &mut Connection) -> Result<Vec<Value>, GridError> {
        let mut rows = Vec::new();
        let mut page = 0u32;

        loop {
            let result = match conn.call("query.exec", self.page_params()) {
                Ok(v) => v,
                Err(e) if e.is_no_rows() => break,
                Err(GridError::Backend { code, name, message }) => {
                    return Err(GridError::Backend {
                        code,
                        name,
                        message: format!("{message} (in page {page})"),
                    });
                }
                Err(e) => return Err(e),
            };

            let chunk = result
                .get("rows")
                .and_then(Value::as_array)
                .ok_or_else(|| GridError::Protocol("query response has no 'rows'".into()))?;
            for raw in chunk {
                rows.push(self.label_row(raw)?);
            }

            self.cursor = result.get("cursor").and_then(Value::as_u64).unwrap_or(0);
            if self.cursor == 0 {
                break;
            }
            page += 1;
        }

        tracing::trace!(rows = rows.len(), pages = page + 1, "Query complete");
        Ok(rows)
    }

    /// Materialize one positional row into a labeled record.
    fn label_row(&self, raw: &Value) -> Result<Value, GridError> {
        let cells = raw
            .as_array()
            .ok_or_else(|| GridError::Protocol("query row is not an array".into()))?;
        if cells.len() != self.columns.len() {
            return Err(GridError::Protocol(format!(
                "query row has {} cells, expected {}",
                cells.len(),
                self.columns.len()
            )));
        }

        let mut record = Map::new();
        for (column, cell) in self.columns.iter().zip(cells) {
            let text = cell
                .as_str()
                .ok_or_else(|| GridError::Protocol("query cell is not a string".into()))?;
            if !text.is_empty() {
                record.insert(column.label().to_owned(), Value::String(text.to_owned()));
            }
        }
        Ok(Value::Object(record))
    }
}

// ─── Target-shaped builders ──────────────────────────────────────────────────

/// Metadata listing for a data object, optionally filtered by attribute.
pub fn object_metadata_query(collection: &str, name: &str, attr: Option<&str>) -> Query {
    let mut q = Query::new(
        QUERY_PAGE_SIZE,
        &[
            Column::MetaDataAttrName,
            Column::MetaDataAttrValue,
            Column::MetaDataAttrUnits,
        ],
    );
    q.push_condition(Column::CollName, Operator::Equals, collection);
    q.push_condition(Column::DataName, Operator::Equals, name);
    if let Some(attr) = attr {
        q.push_condition(Column::MetaDataAttrName, Operator::Equals, attr);
    }
    q
}

/// Metadata listing for a collection, optionally filtered by attribute.
pub fn collection_metadata_query(collection: &str, attr: Option<&str>) -> Query {
    let mut q = Query::new(
        QUERY_PAGE_SIZE,
        &[
            Column::MetaCollAttrName,
            Column::MetaCollAttrValue,
            Column::MetaCollAttrUnits,
        ],
    );
    q.push_condition(Column::CollName, Operator::Equals, collection);
    if let Some(attr) = attr {
        q.push_condition(Column::MetaCollAttrName, Operator::Equals, attr);
    }
    q
}

/// Search for data objects matching every AVU clause.
pub fn object_search_query(avus: &[Avu]) -> Result<Query, GridError> {
    let mut q = Query::new(QUERY_PAGE_SIZE, &[Column::CollName, Column::DataName]);
    for avu in avus {
        let op = avu_operator(avu)?;
        q.push_condition(Column::MetaDataAttrName, Operator::Equals, &avu.attribute);
        q.push_condition(Column::MetaDataAttrValue, op, &avu.value);
    }
    Ok(q)
}

/// Search for collections matching every AVU clause.
pub fn collection_search_query(avus: &[Avu]) -> Result<Query, GridError> {
    let mut q = Query::new(QUERY_PAGE_SIZE, &[Column::CollName]);
    for avu in avus {
        let op = avu_operator(avu)?;
        q.push_condition(Column::MetaCollAttrName, Operator::Equals, &avu.attribute);
        q.push_condition(Column::MetaCollAttrValue, op, &avu.value);
    }
    Ok(q)
}

/// Access listing for a data object.
pub fn object_access_query(collection: &str, name: &str) -> Query {
    let mut q = Query::new(
        QUERY_PAGE_SIZE,
        &[Column::UserName, Column::UserZone, Column::DataAccessName],
    );
    q.push_condition(Column::CollName, Operator::Equals, collection);
    q.push_condition(Column::DataName, Operator::Equals, name);
    q
}

/// Access listing for a collection.
pub fn collection_access_query(collection: &str) -> Query {
    let mut q = Query::new(
        QUERY_PAGE_SIZE,
        &[Column::UserName, Column::UserZone, Column::CollAccessName],
    );
    q.push_condition(Column::CollName, Operator::Equals, collection);
    q
}

/// Replica listing for a data object.
pub fn object_replicate_query(collection: &str, name: &str) -> Query {
    let mut q = Query::new(
        QUERY_PAGE_SIZE,
        &[
            Column::DataReplNum,
            Column::DataChecksum,
            Column::DataReplStatus,
        ],
    );
    q.push_condition(Column::CollName, Operator::Equals, collection);
    q.push_condition(Column::DataName, Operator::Equals, name);
    q
}

fn avu_operator(avu: &Avu) -> Result<Operator, GridError> {
    match avu.operator.as_deref() {
        None => Ok(Operator::Equals),
        Some(s) => Operator::parse(s),
    }
}
