//! Row count constraints against a constant or a second reference.

use super::{fetch_count, target_prefix};
use crate::core::{
    conditions_of, Comparison, Constraint, ConstraintBase, Retrieval, Retrieve, Target, TestResult,
};
use crate::error::Result;
use crate::formatters::format_difference;
use crate::query;
use crate::sources::{Connection, DataReference, Value};
use async_trait::async_trait;
use tracing::instrument;

/// Relation a row count must have to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountCheck {
    Equality,
    /// At least the target.
    Min,
    /// At most the target.
    Max,
}

/// Compares the number of rows of a reference with a target count.
///
/// # Examples
///
/// ```rust
/// use data_judge::constraints::nrows::{NRows, RowCountCheck};
/// use data_judge::core::Constraint;
/// use data_judge::sources::{DataReference, DataSource};
///
/// let companies = DataReference::new(DataSource::table("db", Some("public"), "companies"));
/// let constraint = NRows::within(RowCountCheck::Max, companies, 1_000);
/// assert_eq!(constraint.kind(), "NRowsMax");
/// ```
#[derive(Debug)]
pub struct NRows {
    check: RowCountCheck,
    base: ConstraintBase<u64>,
}

impl NRows {
    pub fn within(check: RowCountCheck, reference: DataReference, n_rows: u64) -> Self {
        Self {
            check,
            base: ConstraintBase::within(reference, n_rows),
        }
    }

    pub fn between(check: RowCountCheck, reference: DataReference, second: DataReference) -> Self {
        Self {
            check,
            base: ConstraintBase::between(reference, second),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }

    /// Counted rows of the latest evaluation.
    pub async fn last_values(&self) -> Option<(u64, u64)> {
        self.base.last_values().await
    }
}

#[async_trait]
impl Constraint for NRows {
    fn kind(&self) -> &'static str {
        match self.check {
            RowCountCheck::Equality => "NRowsEquality",
            RowCountCheck::Min => "NRowsMin",
            RowCountCheck::Max => "NRowsMax",
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
impl Retrieve for NRows {
    type Value = u64;

    fn base(&self) -> &ConstraintBase<u64> {
        &self.base
    }

    #[instrument(skip(self, conn, reference), fields(constraint.kind = self.kind()))]
    async fn retrieve(&self, conn: &dyn Connection, reference: &DataReference) -> Result<Retrieval<u64>> {
        let resolved = reference.resolve(conn).await?;
        // A minimum against a constant only needs to count up to the target.
        let limit = match (self.check, self.base.target()) {
            (RowCountCheck::Min, Target::Value(n)) => Some(*n),
            _ => None,
        };
        let sql = query::row_count(&resolved, limit);
        let n_rows = fetch_count(conn, &sql).await?;
        Ok(Retrieval::new(n_rows, vec![sql]))
    }

    fn compare(&self, factual: &u64, target: &u64) -> Result<Comparison> {
        let (f, t) = format_difference(
            &Value::Int(*factual as i64),
            &Value::Int(*target as i64),
            false,
        );
        let prefix = target_prefix(self.second_reference());
        let reference = self.reference();
        let conditions = conditions_of(self);
        Ok(match self.check {
            RowCountCheck::Equality => Comparison::check(factual == target, || {
                format!("{reference} has {f} row(s) instead of {prefix}{t}. {conditions}")
            }),
            RowCountCheck::Min => Comparison::check(factual >= target, || {
                format!("{reference} has {f} < {prefix}{t} rows. {conditions}")
            }),
            RowCountCheck::Max => Comparison::check(factual <= target, || {
                format!("{reference} has {f} > {prefix}{t} rows. {conditions}")
            }),
        })
    }
}
