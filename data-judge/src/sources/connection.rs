//! Query execution seam.
//!
//! The engine does not construct or own connections. It only needs something
//! that can run a compiled query and hand back rows. [`DataFusionConnection`] is
//! the bundled implementation over an in-process `SessionContext`.

use super::value::{ColumnMeta, RowSet};
use super::DataSource;
use crate::dialect::Dialect;
use crate::error::{JudgeError, Result};
use crate::log_query;
use async_trait::async_trait;
use datafusion::common::{Constraint, TableReference};
use datafusion::prelude::SessionContext;
use std::fmt::Debug;
use tracing::{debug, instrument};

/// A handle able to execute SQL against one backend.
#[async_trait]
pub trait Connection: Debug + Send + Sync {
    /// Dialect used to compile every query sent through this connection.
    fn dialect(&self) -> Dialect;

    /// Executes a query and materialises its rows.
    async fn query(&self, sql: &str) -> Result<RowSet>;

    /// Column names and types of a relation, without reading any rows.
    async fn describe(&self, relation: &str) -> Result<Vec<ColumnMeta>> {
        let sql = format!("SELECT * FROM {relation} WHERE 1 = 0");
        Ok(self.query(&sql).await?.columns)
    }

    /// Primary key columns of a table source, in key order.
    ///
    /// Expression and raw-query sources have no declared key and yield an empty list.
    async fn primary_keys(&self, source: &DataSource) -> Result<Vec<String>> {
        let DataSource::Table { db, schema, table } = source else {
            return Ok(Vec::new());
        };
        let sql = self
            .dialect()
            .primary_key_query(db, schema.as_deref(), table)?;
        let rows = self.query(&sql).await?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|value| value.to_string())
            .collect())
    }
}

/// Connection backed by a DataFusion [`SessionContext`].
#[derive(Clone)]
pub struct DataFusionConnection {
    ctx: SessionContext,
}

impl Debug for DataFusionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFusionConnection")
            .field("session_id", &self.ctx.session_id())
            .finish()
    }
}

impl DataFusionConnection {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }
}

#[async_trait]
impl Connection for DataFusionConnection {
    fn dialect(&self) -> Dialect {
        Dialect::DataFusion
    }

    #[instrument(skip(self, sql), fields(dialect = "datafusion"))]
    async fn query(&self, sql: &str) -> Result<RowSet> {
        log_query!(sql);
        let df = self.ctx.sql(sql).await?;
        let schema = df.schema().as_arrow().clone();
        let batches = df.collect().await?;
        let rows = RowSet::from_batches(&schema, &batches)?;
        debug!(rows = rows.rows.len(), "Query completed");
        Ok(rows)
    }

    async fn primary_keys(&self, source: &DataSource) -> Result<Vec<String>> {
        let DataSource::Table { db, schema, table } = source else {
            return Ok(Vec::new());
        };
        let reference = match schema {
            Some(schema) => TableReference::full(db.as_str(), schema.as_str(), table.as_str()),
            None => TableReference::bare(table.as_str()),
        };
        let provider = self.ctx.table_provider(reference).await?;
        let arrow_schema = provider.schema();

        let mut keys = Vec::new();
        if let Some(constraints) = provider.constraints() {
            for constraint in constraints.iter() {
                if let Constraint::PrimaryKey(indices) = constraint {
                    for &index in indices {
                        let field = arrow_schema.fields().get(index).ok_or_else(|| {
                            JudgeError::Internal(format!(
                                "Primary key index {index} out of range for {source}"
                            ))
                        })?;
                        keys.push(field.name().clone());
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Value;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use datafusion::common::Constraints;
    use datafusion::datasource::MemTable;
    use std::sync::Arc;

    async fn context_with_keys() -> SessionContext {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();
        let table = MemTable::try_new(schema, vec![vec![batch]])
            .unwrap()
            .with_constraints(Constraints::new_unverified(vec![Constraint::PrimaryKey(
                vec![0],
            )]));
        let ctx = SessionContext::new();
        ctx.register_table("keyed", Arc::new(table)).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_query_materialises_values() {
        let conn = DataFusionConnection::new(context_with_keys().await);
        let rows = conn
            .query("SELECT id, name FROM keyed ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.column_names(), vec!["id", "name"]);
        assert_eq!(rows.rows[0], vec![Value::Int(1), Value::from("a")]);
        assert_eq!(rows.rows[1][1], Value::Null);
    }

    #[tokio::test]
    async fn test_describe_reads_no_rows() {
        let conn = DataFusionConnection::new(context_with_keys().await);
        let columns = conn.describe("keyed").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].type_name, "bigint");
        assert_eq!(columns[1].type_name, "varchar");
    }

    #[tokio::test]
    async fn test_primary_keys_from_table_constraints() {
        let conn = DataFusionConnection::new(context_with_keys().await);
        let source = DataSource::table("datafusion", Some("public"), "keyed");
        assert_eq!(conn.primary_keys(&source).await.unwrap(), vec!["id"]);
    }

    #[tokio::test]
    async fn test_query_errors_are_retrieval_errors() {
        let conn = DataFusionConnection::new(SessionContext::new());
        let err = conn.query("SELECT * FROM missing_table").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Retrieval);
    }
}
