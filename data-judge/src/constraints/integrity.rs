//! Key, uniqueness, dependency and completeness constraints.

use super::{fetch_count, format_sample, target_prefix};
use crate::core::{
    apply_output_processors, conditions_of, finish, Comparison, Constraint, ConstraintBase,
    OutputProcessor, Retrieval, Retrieve, TestResult,
};
use crate::dialect::{fold_identifier, PrimaryKeySupport};
use crate::error::{JudgeError, Result};
use crate::query;
use crate::sources::{count_of, Connection, DataReference, Value};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, instrument};

fn require_primary_keys(conn: &dyn Connection, operation: &str) -> Result<()> {
    let dialect = conn.dialect();
    dialect.require(
        dialect.capabilities().primary_keys != PrimaryKeySupport::Unsupported,
        operation,
    )
}

/// Catalog query issued for primary key introspection, when the dialect uses one.
fn primary_key_queries(conn: &dyn Connection, reference: &DataReference) -> Vec<String> {
    match reference.source() {
        crate::sources::DataSource::Table { db, schema, table } => conn
            .dialect()
            .primary_key_query(db, schema.as_deref(), table)
            .map(|sql| vec![sql])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// The declared primary key of a table must be exactly the expected column set.
#[derive(Debug)]
pub struct PrimaryKeyDefinition {
    reference: DataReference,
    primary_keys: Vec<String>,
    name: Option<String>,
}

impl PrimaryKeyDefinition {
    pub fn new(reference: DataReference, primary_keys: Vec<String>) -> Self {
        Self {
            reference,
            primary_keys,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl Constraint for PrimaryKeyDefinition {
    fn kind(&self) -> &'static str {
        "PrimaryKeyDefinition"
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        require_primary_keys(conn, "Primary key retrieval")?;
        let dialect = conn.dialect();
        let factual: BTreeSet<String> = conn
            .primary_keys(self.reference.source())
            .await?
            .into_iter()
            .collect();
        let target: BTreeSet<String> = self
            .primary_keys
            .iter()
            .map(|k| fold_identifier(dialect, k))
            .collect::<Result<_>>()?;
        debug!(factual = ?factual, target = ?target, "Primary keys retrieved");

        let reference = &self.reference;
        // When keys are both missing and superfluous, the missing one is reported.
        let comparison = match (
            target.difference(&factual).next(),
            factual.difference(&target).next(),
        ) {
            (Some(missing), _) => Comparison::Fail(format!(
                "{reference} doesn't include {missing} as primary key."
            )),
            (None, Some(extra)) => Comparison::Fail(format!(
                "{reference} incorrectly includes {extra} as primary key."
            )),
            (None, None) => Comparison::Pass,
        };
        Ok(finish(
            self.kind(),
            self.description(),
            comparison,
            primary_key_queries(conn, reference),
            Vec::new(),
        ))
    }
}

/// Tolerated duplicates of a [`Uniqueness`] check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniquenessTolerance {
    /// At most this fraction of the rows may be duplicates.
    Relative(f64),
    /// At most this many rows may be duplicates.
    Absolute(u64),
}

impl UniquenessTolerance {
    /// Picks the tolerance from the two mutually exclusive parameters.
    pub fn new(max_duplicate_fraction: Option<f64>, max_absolute_n_duplicates: Option<u64>) -> Result<Self> {
        match (max_duplicate_fraction, max_absolute_n_duplicates) {
            (Some(rel), Some(abs)) if rel != 0.0 && abs != 0 => Err(JudgeError::configuration(
                "Uniqueness cannot have both a relative and an absolute tolerance",
            )),
            (Some(rel), _) if rel != 0.0 => {
                if !(0.0..=1.0).contains(&rel) {
                    return Err(JudgeError::configuration(format!(
                        "max_duplicate_fraction must lie in [0, 1], got {rel}"
                    )));
                }
                Ok(UniquenessTolerance::Relative(rel))
            }
            (_, Some(abs)) if abs != 0 => Ok(UniquenessTolerance::Absolute(abs)),
            _ => Ok(UniquenessTolerance::Relative(0.0)),
        }
    }

    /// Whether `unique` distinct tuples out of `rows` rows are enough.
    pub fn holds(&self, rows: u64, unique: u64) -> bool {
        match *self {
            UniquenessTolerance::Relative(fraction) => unique as f64 >= rows as f64 * (1.0 - fraction),
            UniquenessTolerance::Absolute(n) => unique >= rows.saturating_sub(n),
        }
    }
}

impl fmt::Display for UniquenessTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniquenessTolerance::Relative(fraction) => write!(f, "{fraction} (relative)"),
            UniquenessTolerance::Absolute(n) => write!(f, "{n} rows (absolute)"),
        }
    }
}

/// The tuples of the reference's columns (or of the table's primary key) are unique.
#[derive(Debug)]
pub struct Uniqueness {
    reference: DataReference,
    tolerance: UniquenessTolerance,
    infer_pk_columns: bool,
    name: Option<String>,
}

impl Uniqueness {
    pub fn new(reference: DataReference, tolerance: UniquenessTolerance, infer_pk_columns: bool) -> Self {
        Self {
            reference,
            tolerance,
            infer_pk_columns,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    async fn checked_reference(&self, conn: &dyn Connection) -> Result<DataReference> {
        if !self.infer_pk_columns {
            return Ok(self.reference.clone());
        }
        require_primary_keys(conn, "Primary key inference")?;
        let keys = conn.primary_keys(self.reference.source()).await?;
        if keys.is_empty() {
            debug!(reference = %self.reference, "No primary key found; checking all columns");
            return Ok(self.reference.clone());
        }
        self.reference
            .derive(Some(keys), self.reference.condition().cloned())
    }
}

#[async_trait]
impl Constraint for Uniqueness {
    fn kind(&self) -> &'static str {
        "Uniqueness"
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let reference = self.checked_reference(conn).await?;
        let mut resolved = reference.resolve(conn).await?;
        if resolved.columns().is_empty() {
            let all = reference.all_columns(conn).await?;
            resolved = resolved.with_projection(reference.quote_columns(conn, &all).await?);
        }

        let row_sql = query::row_count(&resolved, None);
        let unique_sql = query::distinct_row_count(&resolved);
        let rows = fetch_count(conn, &row_sql).await?;
        let unique = fetch_count(conn, &unique_sql).await?;
        debug!(rows, unique, "Uniqueness counts retrieved");

        let comparison = if rows == 0 || self.tolerance.holds(rows, unique) {
            Comparison::Pass
        } else {
            let sample_sql = query::duplicate_sample(&resolved)?;
            let sample = conn.query(&sample_sql).await?;
            Comparison::Fail(format!(
                "{reference} has {rows} rows > {unique} uniques. This surpasses the \
                 max_duplicate_fraction of {}. An example tuple breaking the uniqueness \
                 condition is: {}.",
                self.tolerance,
                format_sample(&sample)
            ))
        };
        Ok(finish(
            self.kind(),
            self.description(),
            comparison,
            vec![row_sql],
            vec![unique_sql],
        ))
    }
}

/// The key columns functionally determine the remaining columns of the reference.
#[derive(Debug)]
pub struct FunctionalDependency {
    reference: DataReference,
    key_columns: Vec<String>,
    max_relative_violations: f64,
    output_processors: Vec<OutputProcessor>,
    name: Option<String>,
}

impl FunctionalDependency {
    pub fn new(reference: DataReference, key_columns: Vec<String>) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(JudgeError::configuration(
                "Functional dependency needs at least one key column",
            ));
        }
        Ok(Self {
            reference,
            key_columns,
            max_relative_violations: 0.0,
            output_processors: vec![OutputProcessor::default()],
            name: None,
        })
    }

    pub fn with_max_relative_violations(mut self, fraction: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(JudgeError::configuration(format!(
                "max_relative_violations must lie in [0, 1], got {fraction}"
            )));
        }
        self.max_relative_violations = fraction;
        Ok(self)
    }

    pub fn with_output_processors(mut self, processors: Vec<OutputProcessor>) -> Self {
        self.output_processors = processors;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl Constraint for FunctionalDependency {
    fn kind(&self) -> &'static str {
        "FunctionalDependency"
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let resolved = self.reference.resolve(conn).await?;
        let keys = self.reference.quote_columns(conn, &self.key_columns).await?;

        let count_sql = query::functional_dependency_count(&resolved, &keys)?;
        let key_sql = query::distinct_key_count(&resolved, &keys);
        let violating_keys = fetch_count(conn, &count_sql).await?;
        let n_keys = fetch_count(conn, &key_sql).await?;
        debug!(violating_keys, n_keys, "Functional dependency counts retrieved");

        let mut queries = vec![count_sql, key_sql];
        let fraction = if n_keys == 0 {
            0.0
        } else {
            violating_keys as f64 / n_keys as f64
        };
        let comparison = if violating_keys == 0 || fraction <= self.max_relative_violations {
            Comparison::Pass
        } else {
            let violations_sql = query::functional_dependency_violations(&resolved, &keys)?;
            let rows = conn.query(&violations_sql).await?;
            queries.push(violations_sql);
            let tuples: Vec<Value> = rows.rows.into_iter().map(Value::from_row).collect();
            let (shown, _) = apply_output_processors(&self.output_processors, &tuples, None)?;
            let lines: Vec<String> = shown.iter().map(Value::to_string).collect();
            Comparison::Fail(format!(
                "{} has violations of functional dependence (in total {} rows):\n{}",
                self.reference,
                tuples.len(),
                lines.join("\n")
            ))
        };
        Ok(finish(self.kind(), self.description(), comparison, queries, Vec::new()))
    }
}

/// Fraction of `NULL` values of a column against a constant or a second reference.
#[derive(Debug)]
pub struct MaxNullFraction {
    base: ConstraintBase<f64>,
    max_relative_deviation: f64,
}

impl MaxNullFraction {
    pub fn within(reference: DataReference, max_null_fraction: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&max_null_fraction) {
            return Err(JudgeError::configuration(format!(
                "max_null_fraction was expected to lie within [0, 1] but is {max_null_fraction}"
            )));
        }
        Ok(Self {
            base: ConstraintBase::within(reference, max_null_fraction),
            max_relative_deviation: 0.0,
        })
    }

    pub fn between(reference: DataReference, second: DataReference, max_relative_deviation: f64) -> Result<Self> {
        if max_relative_deviation.is_nan() || max_relative_deviation < 0.0 {
            return Err(JudgeError::configuration(format!(
                "max_relative_deviation must be non-negative, got {max_relative_deviation}"
            )));
        }
        Ok(Self {
            base: ConstraintBase::between(reference, second),
            max_relative_deviation,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }
}

#[async_trait]
impl Constraint for MaxNullFraction {
    fn kind(&self) -> &'static str {
        "MaxNullFraction"
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
impl Retrieve for MaxNullFraction {
    type Value = f64;

    fn base(&self) -> &ConstraintBase<f64> {
        &self.base
    }

    async fn retrieve(&self, conn: &dyn Connection, reference: &DataReference) -> Result<Retrieval<f64>> {
        let resolved = reference.resolve(conn).await?;
        let sql = query::null_counts(&resolved)?;
        let rows = conn.query(&sql).await?;
        let total = count_of(&rows.first_row_value(0))?;
        let nulls = count_of(&rows.first_row_value(1))?;
        let fraction = if total == 0 {
            0.0
        } else {
            nulls as f64 / total as f64
        };
        Ok(Retrieval::new(fraction, vec![sql]))
    }

    fn compare(&self, factual: &f64, target: &f64) -> Result<Comparison> {
        let threshold = target * (1.0 + self.max_relative_deviation);
        Ok(Comparison::check(*factual <= threshold, || {
            format!(
                "{factual} of {} values are NULL while only {}{threshold} were allowed to be NULL. {}",
                self.reference(),
                target_prefix(self.second_reference()),
                conditions_of(self)
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{DataFusionConnection, DataSource};
    use crate::test_helpers::{batch, columns, connection, table};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use datafusion::common::{Constraint as TableConstraint, Constraints};
    use datafusion::datasource::MemTable;
    use datafusion::prelude::SessionContext;
    use std::sync::Arc;

    fn ints(values: Vec<Option<i64>>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    fn strings(values: Vec<&str>) -> ArrayRef {
        Arc::new(StringArray::from(values))
    }

    async fn keyed_connection() -> DataFusionConnection {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                ints(vec![Some(1), Some(2), Some(2)]),
                strings(vec!["a", "b", "c"]),
            ],
        )
        .unwrap();
        let table = MemTable::try_new(schema, vec![vec![batch]])
            .unwrap()
            .with_constraints(Constraints::new_unverified(vec![TableConstraint::PrimaryKey(
                vec![0],
            )]));
        let ctx = SessionContext::new();
        ctx.register_table("keyed", Arc::new(table)).unwrap();
        DataFusionConnection::new(ctx)
    }

    #[tokio::test]
    async fn test_primary_key_definition() {
        let conn = keyed_connection().await;
        let ok = PrimaryKeyDefinition::new(table("keyed"), vec!["id".into()]);
        assert!(ok.test(&conn).await.unwrap().outcome);

        let missing = PrimaryKeyDefinition::new(table("keyed"), vec!["id".into(), "name".into()]);
        let result = missing.test(&conn).await.unwrap();
        assert_eq!(
            result.failure_message().as_deref(),
            Some("datafusion.public.keyed doesn't include name as primary key.")
        );

        let extra = PrimaryKeyDefinition::new(table("keyed"), vec![]);
        let result = extra.test(&conn).await.unwrap();
        assert!(result
            .failure_message()
            .unwrap()
            .contains("incorrectly includes id as primary key"));
    }

    #[tokio::test]
    async fn test_uniqueness_infers_primary_key() {
        let conn = keyed_connection().await;
        let all_columns = Uniqueness::new(table("keyed"), UniquenessTolerance::Relative(0.0), false);
        assert!(all_columns.test(&conn).await.unwrap().outcome);

        let inferred = Uniqueness::new(table("keyed"), UniquenessTolerance::Relative(0.0), true);
        let result = inferred.test(&conn).await.unwrap();
        assert!(!result.outcome);
        let message = result.failure_message().unwrap();
        assert!(message.contains("has 3 rows > 2 uniques"));
        assert!(message.contains("id = 2"));

        let tolerant = Uniqueness::new(table("keyed"), UniquenessTolerance::Absolute(1), true);
        assert!(tolerant.test(&conn).await.unwrap().outcome);
    }

    #[test]
    fn test_uniqueness_tolerance() {
        assert!(UniquenessTolerance::new(Some(0.1), Some(2)).is_err());
        assert_eq!(
            UniquenessTolerance::new(None, None).unwrap(),
            UniquenessTolerance::Relative(0.0)
        );
        assert_eq!(
            UniquenessTolerance::new(Some(0.0), Some(3)).unwrap(),
            UniquenessTolerance::Absolute(3)
        );
        assert!(UniquenessTolerance::Relative(0.25).holds(4, 3));
        assert!(!UniquenessTolerance::Relative(0.2).holds(4, 3));
        assert!(UniquenessTolerance::Absolute(5).holds(4, 0));
    }

    #[tokio::test]
    async fn test_empty_reference_is_unique() {
        let conn = connection(vec![("empty", batch(vec![("id", ints(vec![]))]))]);
        let constraint = Uniqueness::new(columns("empty", &["id"]), UniquenessTolerance::Relative(0.0), false);
        assert!(constraint.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_primary_keys_unsupported_on_raw_sources() {
        let conn = keyed_connection().await;
        let raw = DataReference::new(
            DataSource::raw_query("recent", "SELECT * FROM keyed", None).unwrap(),
        );
        let result = PrimaryKeyDefinition::new(raw, vec!["id".into()]).test(&conn).await.unwrap();
        assert!(!result.outcome);
    }

    #[tokio::test]
    async fn test_functional_dependency() {
        let conn = connection(vec![(
            "deps",
            batch(vec![
                ("k", ints(vec![Some(1), Some(1), Some(2), Some(3), Some(3)])),
                ("v", ints(vec![Some(10), Some(11), Some(20), Some(30), Some(30)])),
            ]),
        )]);
        let constraint =
            FunctionalDependency::new(columns("deps", &["k", "v"]), vec!["k".into()]).unwrap();
        let result = constraint.test(&conn).await.unwrap();
        assert!(!result.outcome);
        let message = result.failure_message().unwrap();
        assert!(message.contains("(in total 2 rows):\n(1, 10)\n(1, 11)"));

        let tolerant = FunctionalDependency::new(columns("deps", &["k", "v"]), vec!["k".into()])
            .unwrap()
            .with_max_relative_violations(0.34)
            .unwrap();
        assert!(tolerant.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_max_null_fraction() {
        let conn = connection(vec![
            ("a", batch(vec![("x", ints(vec![Some(1), None, None, Some(4)]))])),
            ("b", batch(vec![("x", ints(vec![Some(1), None, Some(3), Some(4)]))])),
        ]);
        assert!(MaxNullFraction::within(columns("a", &["x"]), 0.5)
            .unwrap()
            .test(&conn)
            .await
            .unwrap()
            .outcome);
        let result = MaxNullFraction::within(columns("a", &["x"]), 0.4)
            .unwrap()
            .test(&conn)
            .await
            .unwrap();
        assert_eq!(
            result.failure_message().as_deref(),
            Some("0.5 of datafusion.public.a's column(s) 'x' values are NULL while only 0.4 were allowed to be NULL.")
        );

        assert!(MaxNullFraction::between(columns("a", &["x"]), columns("b", &["x"]), 1.0)
            .unwrap()
            .test(&conn)
            .await
            .unwrap()
            .outcome);
        assert!(MaxNullFraction::within(columns("a", &["x"]), 1.5).is_err());
        assert!(MaxNullFraction::between(columns("a", &["x"]), columns("b", &["x"]), -0.1).is_err());
    }
}
