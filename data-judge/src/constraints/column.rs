//! Column existence, column set relations and column types.

use crate::core::{Comparison, Constraint, ConstraintBase, Retrieval, Retrieve, Target, TestResult};
use crate::dialect::{Dialect, IdentifierFolding};
use crate::error::{JudgeError, Result};
use crate::sources::{Connection, DataReference};
use async_trait::async_trait;
use std::fmt;

/// Query that exposes a relation's columns without reading rows.
fn describe_query(reference: &DataReference, dialect: Dialect) -> Result<String> {
    Ok(format!(
        "SELECT * FROM {} WHERE 1 = 0",
        reference.source().relation(dialect)?
    ))
}

/// Names as the dialect reports them; folding backends report lower case.
fn fold_names(dialect: Dialect, names: &[String]) -> Vec<String> {
    match dialect.capabilities().folding {
        IdentifierFolding::FoldLower => names.iter().map(|n| n.to_lowercase()).collect(),
        _ => names.to_vec(),
    }
}

/// How the factual column names relate to the target names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCheck {
    /// Every target column exists.
    Existence,
    /// Every column of the first source exists in the second.
    Subset,
    /// Every column of the second source exists in the first.
    Superset,
}

/// Checks on the column names of a source.
#[derive(Debug)]
pub struct ColumnSet {
    check: ColumnCheck,
    base: ConstraintBase<Vec<String>>,
}

impl ColumnSet {
    /// The source has all of `columns`.
    pub fn existence<I, S>(reference: DataReference, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            check: ColumnCheck::Existence,
            base: ConstraintBase::within(reference, columns.into_iter().map(Into::into).collect()),
        }
    }

    pub fn between(check: ColumnCheck, reference: DataReference, second: DataReference) -> Self {
        Self {
            check,
            base: ConstraintBase::between(reference, second),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }
}

#[async_trait]
impl Constraint for ColumnSet {
    fn kind(&self) -> &'static str {
        match self.check {
            ColumnCheck::Existence => "ColumnExistence",
            ColumnCheck::Subset => "ColumnSubset",
            ColumnCheck::Superset => "ColumnSuperset",
        }
    }

    fn reference(&self) -> &DataReference {
        self.base.reference()
    }

    fn second_reference(&self) -> Option<&DataReference> {
        self.base.second_reference()
    }

    fn name(&self) -> Option<&str> {
        self.base.name()
    }

    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        self.evaluate(conn).await
    }
}

#[async_trait]
impl Retrieve for ColumnSet {
    type Value = Vec<String>;

    fn base(&self) -> &ConstraintBase<Vec<String>> {
        &self.base
    }

    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Vec<String>>> {
        let names = reference.all_columns(conn).await?;
        let sql = describe_query(reference, conn.dialect())?;
        Ok(Retrieval::new(names, vec![sql]))
    }

    /// Expected names are folded the way the dialect reports them.
    async fn get_target_value(&self, conn: &dyn Connection) -> Result<Retrieval<Vec<String>>> {
        match self.base.target() {
            Target::Value(names) => Ok(Retrieval::constant(fold_names(conn.dialect(), names))),
            Target::Reference(reference) => self.retrieve(conn, reference).await,
        }
    }

    fn compare(&self, factual: &Vec<String>, target: &Vec<String>) -> Result<Comparison> {
        let missing = |names: &[String], from: &[String]| -> Vec<String> {
            names.iter().filter(|n| !from.contains(n)).cloned().collect()
        };
        let reference = self.reference();
        Ok(match self.check {
            ColumnCheck::Existence | ColumnCheck::Superset => {
                let absent = missing(target, factual);
                Comparison::check(absent.is_empty(), || {
                    format!("{} doesn't have column(s) {}.", reference.source(), absent.join(", "))
                })
            }
            ColumnCheck::Subset => {
                let absent = missing(factual, target);
                let second = self
                    .second_reference()
                    .map(|s| s.source().to_string())
                    .unwrap_or_default();
                Comparison::check(absent.is_empty(), || {
                    format!("{second} doesn't have column(s) {}.", absent.join(", "))
                })
            }
        })
    }
}

/// Dialect independent type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Text,
    Date,
    Timestamp,
    Boolean,
}

impl TypeFamily {
    /// Family of a normalised, lower-case type name.
    pub fn of(type_name: &str) -> Option<TypeFamily> {
        let name = type_name.trim().to_lowercase();
        let base = name.split('(').next().unwrap_or(&name).trim();
        Some(match base {
            "tinyint" | "smallint" | "int" | "integer" | "bigint" | "int2" | "int4" | "int8"
            | "int64" | "hugeint" => TypeFamily::Integer,
            "real" | "float" | "float4" | "float8" | "float64" | "double" | "double precision"
            | "decimal" | "numeric" | "number" | "bignumeric" => TypeFamily::Float,
            "varchar" | "char" | "character" | "character varying" | "text" | "string"
            | "nvarchar" | "nchar" | "utf8" => TypeFamily::Text,
            "date" => TypeFamily::Date,
            "timestamp" | "datetime" | "datetime2" | "smalldatetime" | "timestamptz"
            | "timestamp with time zone" | "timestamp without time zone" => TypeFamily::Timestamp,
            "boolean" | "bool" | "bit" => TypeFamily::Boolean,
            _ => return None,
        })
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeFamily::Integer => "integer",
            TypeFamily::Float => "float",
            TypeFamily::Text => "text",
            TypeFamily::Date => "date",
            TypeFamily::Timestamp => "timestamp",
            TypeFamily::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Expected column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTarget {
    /// Backend type name; the reported name must start with it, ignoring case.
    Name(String),
    Family(TypeFamily),
}

impl fmt::Display for TypeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTarget::Name(name) => f.write_str(name),
            TypeTarget::Family(family) => write!(f, "{family}"),
        }
    }
}

/// Type of a single column against a type name, a family, or the other side's type.
#[derive(Debug)]
pub struct ColumnType {
    base: ConstraintBase<TypeTarget>,
}

impl ColumnType {
    pub fn within(reference: DataReference, target: TypeTarget) -> Self {
        Self {
            base: ConstraintBase::within(reference, target),
        }
    }

    pub fn between(reference: DataReference, second: DataReference) -> Self {
        Self {
            base: ConstraintBase::between(reference, second),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }
}

#[async_trait]
impl Constraint for ColumnType {
    fn kind(&self) -> &'static str {
        "ColumnType"
    }

    fn reference(&self) -> &DataReference {
        self.base.reference()
    }

    fn second_reference(&self) -> Option<&DataReference> {
        self.base.second_reference()
    }

    fn name(&self) -> Option<&str> {
        self.base.name()
    }

    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        self.evaluate(conn).await
    }
}

#[async_trait]
impl Retrieve for ColumnType {
    type Value = TypeTarget;

    fn base(&self) -> &ConstraintBase<TypeTarget> {
        &self.base
    }

    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<TypeTarget>> {
        let column = reference.single_column()?;
        let dialect = conn.dialect();
        let folded = crate::dialect::fold_identifier(dialect, column)?;
        let schema = reference.schema(conn).await?;
        let meta = schema
            .iter()
            .find(|meta| meta.name == folded || meta.name.eq_ignore_ascii_case(&folded))
            .ok_or_else(|| JudgeError::ColumnNotFound {
                column: column.to_string(),
                source_name: reference.source().to_string(),
            })?;
        let sql = describe_query(reference, dialect)?;
        Ok(Retrieval::new(
            TypeTarget::Name(dialect.normalize_type_name(&meta.type_name)),
            vec![sql],
        ))
    }

    fn compare(&self, factual: &TypeTarget, target: &TypeTarget) -> Result<Comparison> {
        let TypeTarget::Name(factual_name) = factual else {
            return Ok(Comparison::Pass);
        };
        let holds = match target {
            TypeTarget::Name(name) => factual_name.to_lowercase().starts_with(&name.to_lowercase()),
            TypeTarget::Family(family) => TypeFamily::of(factual_name) == Some(*family),
        };
        let reference = self.reference();
        Ok(Comparison::check(holds, || {
            format!("{reference} is {factual} instead of {target}.")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection, table};
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use std::sync::Arc;

    fn conn() -> crate::sources::DataFusionConnection {
        let id: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
        let name: ArrayRef = Arc::new(StringArray::from(vec!["QuantCo", "Google"]));
        let size: ArrayRef = Arc::new(Float64Array::from(vec![1.0, 2.0]));
        connection(vec![
            (
                "companies",
                batch(vec![("id", id.clone()), ("name", name.clone()), ("size", size)]),
            ),
            ("archive", batch(vec![("id", id), ("name", name)])),
        ])
    }

    #[tokio::test]
    async fn test_column_existence() {
        let conn = conn();
        let exists = ColumnSet::existence(table("companies"), ["name"]);
        assert!(exists.test(&conn).await.unwrap().outcome);

        let missing = ColumnSet::existence(table("companies"), ["name", "revenue", "country"]);
        let result = missing.test(&conn).await.unwrap();
        assert_eq!(
            result.failure_message().as_deref(),
            Some("datafusion.public.companies doesn't have column(s) revenue, country.")
        );
        assert_eq!(missing.kind(), "ColumnExistence");
    }

    #[tokio::test]
    async fn test_column_subset_and_superset() {
        let conn = conn();
        let subset = ColumnSet::between(ColumnCheck::Subset, table("archive"), table("companies"));
        assert!(subset.test(&conn).await.unwrap().outcome);

        let subset = ColumnSet::between(ColumnCheck::Subset, table("companies"), table("archive"));
        assert_eq!(
            subset.test(&conn).await.unwrap().failure_message().as_deref(),
            Some("datafusion.public.archive doesn't have column(s) size.")
        );

        let superset = ColumnSet::between(ColumnCheck::Superset, table("archive"), table("companies"));
        assert_eq!(
            superset.test(&conn).await.unwrap().failure_message().as_deref(),
            Some("datafusion.public.archive doesn't have column(s) size.")
        );
    }

    #[test]
    fn test_type_families() {
        assert_eq!(TypeFamily::of("BIGINT"), Some(TypeFamily::Integer));
        assert_eq!(TypeFamily::of("decimal(10, 2)"), Some(TypeFamily::Float));
        assert_eq!(TypeFamily::of("varchar(255)"), Some(TypeFamily::Text));
        assert_eq!(TypeFamily::of("timestamp"), Some(TypeFamily::Timestamp));
        assert_eq!(TypeFamily::of("geometry"), None);
        assert_eq!(
            Dialect::Snowflake.normalize_type_name("DECIMAL(38, 0)"),
            "integer"
        );
    }

    #[tokio::test]
    async fn test_column_type() {
        let conn = conn();
        let id = columns("companies", &["id"]);
        assert!(ColumnType::within(id.clone(), TypeTarget::Name("BIGINT".into()))
            .test(&conn)
            .await
            .unwrap()
            .outcome);
        assert!(ColumnType::within(id.clone(), TypeTarget::Family(TypeFamily::Integer))
            .test(&conn)
            .await
            .unwrap()
            .outcome);

        let wrong = ColumnType::within(id.clone(), TypeTarget::Name("varchar".into()));
        assert_eq!(
            wrong.test(&conn).await.unwrap().failure_message().as_deref(),
            Some("datafusion.public.companies's column(s) 'id' is bigint instead of varchar.")
        );

        let between = ColumnType::between(columns("companies", &["name"]), columns("archive", &["name"]));
        assert!(between.test(&conn).await.unwrap().outcome);
        let between = ColumnType::between(columns("companies", &["size"]), id);
        assert!(!between.test(&conn).await.unwrap().outcome);
    }
}
