//! Data sources, references and the connection seam.
//!
//! A [`DataSource`] names something that can be selected from. A
//! [`DataReference`] narrows it to a column subset and an optional
//! [`Condition`]; every query the engine issues is built against a reference.

mod condition;
mod connection;
mod reference;
mod value;

pub use condition::{merge_conditions, Condition, Operator};
pub use connection::{Connection, DataFusionConnection};
pub use reference::{DataReference, Resolved};
pub use value::{count_of, sql_type_name, ColumnMeta, RowSet, Value};

pub(crate) use condition::resolve_column;

use crate::dialect::Dialect;
use crate::error::{JudgeError, Result};
use datafusion::sql::sqlparser::ast::{Query, Statement};
use datafusion::sql::sqlparser::dialect::GenericDialect;
use datafusion::sql::sqlparser::parser::Parser;
use std::fmt;

/// Alias given to expression and raw-query sources when used as subqueries.
const SOURCE_ALIAS: &str = "dj_source";

/// A retrievable relation.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    /// A table, optionally schema-qualified.
    Table {
        db: String,
        schema: Option<String>,
        table: String,
    },
    /// A pre-built, validated query expression.
    Expression { name: String, query: Box<Query> },
    /// Opaque SQL text used as a subquery.
    RawQuery {
        name: String,
        query: String,
        /// Declared output columns; when absent they are introspected.
        columns: Option<Vec<String>>,
    },
}

impl DataSource {
    pub fn table(db: impl Into<String>, schema: Option<&str>, table: impl Into<String>) -> Self {
        DataSource::Table {
            db: db.into(),
            schema: schema.map(str::to_string),
            table: table.into(),
        }
    }

    /// Parses `sql` into a query expression.
    ///
    /// Fails with a configuration error unless `sql` is exactly one query.
    pub fn expression(name: impl Into<String>, sql: &str) -> Result<Self> {
        let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| JudgeError::configuration(format!("Malformed expression: {e}")))?;
        match (statements.pop(), statements.is_empty()) {
            (Some(Statement::Query(query)), true) => Ok(DataSource::Expression {
                name: name.into(),
                query,
            }),
            _ => Err(JudgeError::configuration(
                "An expression source must be a single SELECT query",
            )),
        }
    }

    /// Wraps an already built query.
    pub fn from_query(name: impl Into<String>, query: Query) -> Self {
        DataSource::Expression {
            name: name.into(),
            query: Box::new(query),
        }
    }

    pub fn raw_query(
        name: impl Into<String>,
        query: impl Into<String>,
        columns: Option<Vec<String>>,
    ) -> Result<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(JudgeError::configuration("Raw query cannot be empty"));
        }
        if let Some(cols) = &columns {
            if cols.is_empty() {
                return Err(JudgeError::configuration(
                    "Declared raw query columns cannot be empty",
                ));
            }
        }
        Ok(DataSource::RawQuery {
            name: name.into(),
            query: query.trim().trim_end_matches(';').to_string(),
            columns,
        })
    }

    /// The selectable relation for `dialect`, usable after `FROM`.
    pub fn relation(&self, dialect: Dialect) -> Result<String> {
        match self {
            DataSource::Table { db, schema, table } => {
                dialect.table_relation(db, schema.as_deref(), table)
            }
            DataSource::Expression { query, .. } => Ok(format!("({query}) AS {SOURCE_ALIAS}")),
            DataSource::RawQuery { query, .. } => Ok(format!("({query}) AS {SOURCE_ALIAS}")),
        }
    }

    /// Columns declared up front, if any.
    pub fn declared_columns(&self) -> Option<&[String]> {
        match self {
            DataSource::RawQuery {
                columns: Some(columns),
                ..
            } => Some(columns),
            _ => None,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Table {
                db,
                schema: Some(schema),
                table,
            } => write!(f, "{db}.{schema}.{table}"),
            DataSource::Table { table, .. } => f.write_str(table),
            DataSource::Expression { name, .. } | DataSource::RawQuery { name, .. } => {
                f.write_str(name)
            }
        }
    }
}
