use super::condition::resolve_column;
use super::{ColumnMeta, Condition, Connection, DataSource};
use crate::dialect::{fold_identifier, Dialect};
use crate::error::{JudgeError, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// A data source narrowed to a column subset and an optional condition.
///
/// The source's column list is introspected at most once per reference and shared
/// with every reference derived from it.
#[derive(Debug, Clone)]
pub struct DataReference {
    source: Arc<DataSource>,
    columns: Option<Vec<String>>,
    condition: Option<Condition>,
    schema: Arc<OnceCell<Vec<ColumnMeta>>>,
}

impl DataReference {
    /// A reference to all columns of `source`.
    pub fn new(source: impl Into<Arc<DataSource>>) -> Self {
        Self {
            source: source.into(),
            columns: None,
            condition: None,
            schema: Arc::new(OnceCell::new()),
        }
    }

    /// Restricts the reference to `columns`, which must be non-empty and distinct.
    pub fn with_columns<I, S>(mut self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(JudgeError::configuration(format!(
                "Column list of a reference to {} cannot be empty",
                self.source
            )));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            crate::dialect::validate_identifier(column)?;
            if !seen.insert(column.as_str()) {
                return Err(JudgeError::configuration(format!(
                    "Column '{column}' is listed twice for {}",
                    self.source
                )));
            }
        }
        self.columns = Some(columns);
        Ok(self)
    }

    pub fn with_condition(mut self, condition: Option<Condition>) -> Self {
        self.condition = condition;
        self
    }

    /// A sibling reference over the same source and schema cache.
    pub fn derive(&self, columns: Option<Vec<String>>, condition: Option<Condition>) -> Result<Self> {
        let base = Self {
            source: Arc::clone(&self.source),
            columns: None,
            condition,
            schema: Arc::clone(&self.schema),
        };
        match columns {
            Some(columns) => base.with_columns(columns),
            None => Ok(base),
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// The only column of this reference.
    pub fn single_column(&self) -> Result<&str> {
        match self.columns.as_deref() {
            Some([column]) => Ok(column),
            _ => Err(JudgeError::configuration(format!(
                "Exactly one column is required for {self}"
            ))),
        }
    }

    /// Introspected (or declared) column metadata of the source.
    pub async fn schema(&self, conn: &dyn Connection) -> Result<Vec<ColumnMeta>> {
        let schema = self
            .schema
            .get_or_try_init(|| async {
                if let Some(declared) = self.source.declared_columns() {
                    return Ok(declared
                        .iter()
                        .map(|name| ColumnMeta {
                            name: name.clone(),
                            type_name: "unknown".to_string(),
                        })
                        .collect());
                }
                debug!(source = %self.source, "Introspecting source columns");
                let relation = self.source.relation(conn.dialect())?;
                conn.describe(&relation).await
            })
            .await?;
        Ok(schema.clone())
    }

    /// All column names of the source.
    pub async fn all_columns(&self, conn: &dyn Connection) -> Result<Vec<String>> {
        Ok(self
            .schema(conn)
            .await?
            .into_iter()
            .map(|meta| meta.name)
            .collect())
    }

    /// Folds, checks and quotes arbitrary column names against the source.
    pub async fn quote_columns(&self, conn: &dyn Connection, names: &[String]) -> Result<Vec<String>> {
        let dialect = conn.dialect();
        let known = self.all_columns(conn).await?;
        names
            .iter()
            .map(|name| {
                let folded = fold_identifier(dialect, name)?;
                resolve_column(dialect, &folded, &known).map_err(|_| JudgeError::ColumnNotFound {
                    column: name.clone(),
                    source_name: self.source.to_string(),
                })?;
                dialect.column(&folded)
            })
            .collect()
    }

    /// Compiles the reference for the connection's dialect.
    pub async fn resolve(&self, conn: &dyn Connection) -> Result<Resolved> {
        let dialect = conn.dialect();
        let relation = self.source.relation(dialect)?;

        let needs_schema = self.columns.is_some()
            || self.condition.as_ref().is_some_and(Condition::has_clauses);
        let known = if needs_schema {
            Some(self.all_columns(conn).await?)
        } else {
            None
        };

        let (columns, column_names) = match &self.columns {
            Some(columns) => {
                let names = columns
                    .iter()
                    .map(|c| fold_identifier(dialect, c))
                    .collect::<Result<Vec<_>>>()?;
                (self.quote_columns(conn, columns).await?, names)
            }
            None => (Vec::new(), Vec::new()),
        };

        let filter = self
            .condition
            .as_ref()
            .map(|c| c.to_sql(dialect, known.as_deref()))
            .transpose()?;

        Ok(Resolved {
            dialect,
            relation,
            columns,
            column_names,
            filter,
        })
    }
}

impl fmt::Display for DataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.columns {
            Some(columns) => {
                let quoted: Vec<String> = columns.iter().map(|c| format!("'{c}'")).collect();
                write!(f, "{}'s column(s) {}", self.source, quoted.join(", "))
            }
            None => write!(f, "{}", self.source),
        }
    }
}

/// A reference compiled for one dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    dialect: Dialect,
    relation: String,
    /// Quoted column expressions; empty means all columns.
    columns: Vec<String>,
    /// Folded, unquoted column names.
    column_names: Vec<String>,
    filter: Option<String>,
}

impl Resolved {
    /// Builds a resolved reference directly; used for SQL generation without a connection.
    pub fn new(
        dialect: Dialect,
        relation: impl Into<String>,
        column_names: &[&str],
        filter: Option<&str>,
    ) -> Result<Self> {
        let column_names = column_names
            .iter()
            .map(|c| fold_identifier(dialect, c))
            .collect::<Result<Vec<_>>>()?;
        let columns = column_names
            .iter()
            .map(|c| dialect.column(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dialect,
            relation: relation.into(),
            columns,
            column_names,
            filter: filter.map(str::to_string),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// The single quoted column.
    pub fn column(&self) -> Result<&str> {
        match self.columns.as_slice() {
            [column] => Ok(column),
            _ => Err(JudgeError::configuration(format!(
                "Exactly one column is required, got {}",
                self.columns.len()
            ))),
        }
    }

    /// Comma separated projection, `*` for all columns.
    pub fn projection(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        }
    }

    fn where_clause(&self) -> String {
        self.filter
            .as_ref()
            .map(|f| format!(" WHERE {f}"))
            .unwrap_or_default()
    }

    /// `SELECT <columns> FROM <relation> [WHERE <condition>]`
    pub fn selection(&self) -> String {
        format!("SELECT {} FROM {}{}", self.projection(), self.relation, self.where_clause())
    }

    /// Like [`selection`](Self::selection) with `DISTINCT`.
    pub fn distinct_selection(&self) -> String {
        format!(
            "SELECT DISTINCT {} FROM {}{}",
            self.projection(),
            self.relation,
            self.where_clause()
        )
    }

    /// Same relation with `predicate` AND-ed onto the filter.
    pub fn with_predicate(&self, predicate: &str) -> Self {
        let filter = match &self.filter {
            Some(existing) => format!("({existing}) AND ({predicate})"),
            None => predicate.to_string(),
        };
        Self {
            filter: Some(filter),
            ..self.clone()
        }
    }

    /// Same relation projecting other, already quoted, columns.
    pub fn with_projection(&self, columns: Vec<String>) -> Self {
        Self {
            columns,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_display() {
        let reference = DataReference::new(DataSource::table("db", Some("public"), "companies"))
            .with_columns(["name", "num_employees"])
            .unwrap();
        assert_eq!(
            reference.to_string(),
            "db.public.companies's column(s) 'name', 'num_employees'"
        );
    }

    #[test]
    fn test_columns_must_be_distinct_and_non_empty() {
        let base = DataReference::new(DataSource::table("db", None, "t"));
        assert!(base.clone().with_columns(Vec::<String>::new()).is_err());
        assert!(base.clone().with_columns(["a", "a"]).is_err());
        assert!(base.with_columns(["a", "b"]).is_ok());
    }

    #[test]
    fn test_single_column() {
        let reference = DataReference::new(DataSource::table("db", None, "t"))
            .with_columns(["a", "b"])
            .unwrap();
        assert!(reference.single_column().is_err());
    }

    #[test]
    fn test_resolved_selection() {
        let resolved = Resolved::new(
            Dialect::Mssql,
            "[db].[dbo].[t] WITH (NOLOCK)",
            &["Name"],
            Some("x > 1"),
        )
        .unwrap();
        assert_eq!(
            resolved.selection(),
            "SELECT [Name] FROM [db].[dbo].[t] WITH (NOLOCK) WHERE x > 1"
        );
        assert_eq!(
            resolved.with_predicate("y < 2").filter(),
            Some("(x > 1) AND (y < 2)")
        );
    }
}
