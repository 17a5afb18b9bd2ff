//! Row set comparisons between two references.
//!
//! Rows are compared as distinct tuples of each reference's columns through the
//! dialect's `EXCEPT`. None of these checks run on dialects without row set
//! operations.

use super::{fetch_count, format_sample};
use crate::core::{conditions_of, finish, Comparison, Constraint, TestResult, Tolerance};
use crate::error::{JudgeError, Result};
use crate::query;
use crate::sources::{count_of, Connection, DataReference, Resolved, RowSet};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Which rows must be found on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSetCheck {
    /// Rows missing from either side, relative to the union.
    Equality,
    /// Rows of the first reference missing from the second.
    Subset,
    /// Rows of the second reference missing from the first.
    Superset,
}

/// Bounds the fraction of distinct rows missing from the other reference.
#[derive(Debug)]
pub struct RowSetComparison {
    check: RowSetCheck,
    reference: DataReference,
    second: DataReference,
    max_missing_fraction: Tolerance,
    name: Option<String>,
}

impl RowSetComparison {
    pub fn new(
        check: RowSetCheck,
        reference: DataReference,
        second: DataReference,
        max_missing_fraction: Tolerance,
    ) -> Self {
        Self {
            check,
            reference,
            second,
            max_missing_fraction,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    async fn sample(&self, conn: &dyn Connection, first: &Resolved, second: &Resolved) -> Result<RowSet> {
        conn.query(&query::except_sample(first, second)?).await
    }

    fn judge(
        &self,
        missing: (u64, u64),
        total: u64,
        limit: f64,
        samples: (&RowSet, &RowSet),
    ) -> Comparison {
        let (missing_left, missing_right) = missing;
        let (first, second) = (&self.reference, &self.second);
        let conditions = conditions_of(self);
        if total == 0 {
            return Comparison::Pass;
        }
        match self.check {
            RowSetCheck::Equality => {
                let fraction = (missing_left + missing_right) as f64 / total as f64;
                Comparison::check(fraction <= limit, || {
                    let sample = if missing_left > 0 {
                        format_sample(samples.0)
                    } else {
                        format_sample(samples.1)
                    };
                    format!(
                        "{fraction} > {limit} of rows differ between {first} and {second}. \
                         E.g. for {sample}. {conditions}"
                    )
                })
            }
            RowSetCheck::Subset => {
                let fraction = missing_left as f64 / total as f64;
                Comparison::check(fraction <= limit, || {
                    format!(
                        "{fraction} > {limit} of rows of {first} are not in {second}. \
                         E.g. for {}. {conditions}",
                        format_sample(samples.0)
                    )
                })
            }
            RowSetCheck::Superset => {
                let fraction = missing_right as f64 / total as f64;
                Comparison::check(fraction <= limit, || {
                    format!(
                        "{fraction} > {limit} of rows of {second} are not in {first}. \
                         E.g. for {}. {conditions}",
                        format_sample(samples.1)
                    )
                })
            }
        }
    }
}

#[async_trait]
impl Constraint for RowSetComparison {
    fn kind(&self) -> &'static str {
        match self.check {
            RowSetCheck::Equality => "RowEquality",
            RowSetCheck::Subset => "RowSubset",
            RowSetCheck::Superset => "RowSuperset",
        }
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn second_reference(&self) -> Option<&DataReference> {
        Some(&self.second)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let first = self.reference.resolve(conn).await?;
        let second = self.second.resolve(conn).await?;
        let (limit, tolerance_queries) = self
            .max_missing_fraction
            .resolve(conn, &self.reference, &self.second)
            .await?;

        let left_sql = query::except_count(&first, &second)?;
        let right_sql = query::except_count(&second, &first)?;
        let missing_left = fetch_count(conn, &left_sql).await?;
        let missing_right = fetch_count(conn, &right_sql).await?;
        let total_sql = match self.check {
            RowSetCheck::Equality => query::union_count(&first, &second),
            RowSetCheck::Subset => query::distinct_row_count(&first),
            RowSetCheck::Superset => query::distinct_row_count(&second),
        };
        let total = fetch_count(conn, &total_sql).await?;
        debug!(missing_left, missing_right, total, "Row differences counted");

        let comparison = match limit {
            None => Comparison::Pass,
            Some(limit) => {
                let left_sample = self.sample(conn, &first, &second).await?;
                let right_sample = self.sample(conn, &second, &first).await?;
                self.judge(
                    (missing_left, missing_right),
                    total,
                    limit,
                    (&left_sample, &right_sample),
                )
            }
        };
        let mut target_queries = vec![total_sql];
        target_queries.extend(tolerance_queries);
        Ok(finish(
            self.kind(),
            self.description(),
            comparison,
            vec![left_sql, right_sql],
            target_queries,
        ))
    }
}

/// Rows joined on matching columns agree on the comparison columns.
///
/// Two `NULL`s compare equal. The fraction of matched rows that differ must stay
/// at or below `max_missing_fraction`; no matched rows at all is a failure.
#[derive(Debug)]
pub struct RowMatchingEquality {
    reference: DataReference,
    second: DataReference,
    matching_columns: (Vec<String>, Vec<String>),
    comparison_columns: (Vec<String>, Vec<String>),
    max_missing_fraction: f64,
    name: Option<String>,
}

impl RowMatchingEquality {
    pub fn new(
        reference: DataReference,
        second: DataReference,
        matching_columns: (Vec<String>, Vec<String>),
        comparison_columns: (Vec<String>, Vec<String>),
        max_missing_fraction: f64,
    ) -> Result<Self> {
        for (what, (a, b)) in [("matching", &matching_columns), ("comparison", &comparison_columns)] {
            if a.is_empty() || a.len() != b.len() {
                return Err(JudgeError::configuration(format!(
                    "Expected the same, non-zero number of {what} columns on both sides, got {} and {}",
                    a.len(),
                    b.len()
                )));
            }
        }
        if !(0.0..=1.0).contains(&max_missing_fraction) {
            return Err(JudgeError::configuration(format!(
                "max_missing_fraction has to be between 0 and 1, got {max_missing_fraction}"
            )));
        }
        Ok(Self {
            reference,
            second,
            matching_columns,
            comparison_columns,
            max_missing_fraction,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    async fn pairs(
        &self,
        conn: &dyn Connection,
        (first, second): &(Vec<String>, Vec<String>),
    ) -> Result<Vec<(String, String)>> {
        let first = self.reference.quote_columns(conn, first).await?;
        let second = self.second.quote_columns(conn, second).await?;
        Ok(first.into_iter().zip(second).collect())
    }

    fn columns_description(&self) -> String {
        let list = |columns: &[String]| {
            let quoted: Vec<String> = columns.iter().map(|c| format!("'{c}'")).collect();
            format!("[{}]", quoted.join(", "))
        };
        format!(
            "Matched on {} and {}. Compared on {} and {}.",
            list(&self.matching_columns.0),
            list(&self.matching_columns.1),
            list(&self.comparison_columns.0),
            list(&self.comparison_columns.1)
        )
    }
}

#[async_trait]
impl Constraint for RowMatchingEquality {
    fn kind(&self) -> &'static str {
        "RowMatchingEquality"
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn second_reference(&self) -> Option<&DataReference> {
        Some(&self.second)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        // The join needs every column of both sides, not just a projection.
        let first = self.reference.resolve(conn).await?.with_projection(Vec::new());
        let second = self.second.resolve(conn).await?.with_projection(Vec::new());
        let matching = self.pairs(conn, &self.matching_columns).await?;
        let comparison = self.pairs(conn, &self.comparison_columns).await?;

        let sql = query::row_mismatch(&first, &second, &matching, &comparison)?;
        let rows = conn.query(&sql).await?;
        let mismatch = rows.first_row_value(0).as_f64();
        let n_matched = count_of(&rows.first_row_value(1))?;
        debug!(?mismatch, n_matched, "Row mismatch retrieved");

        let (first, second) = (&self.reference, &self.second);
        let conditions = conditions_of(self);
        let verdict = match mismatch {
            None => Comparison::Fail(format!(
                "No rows of {first} and {second} match. {}",
                self.columns_description()
            )),
            Some(fraction) => Comparison::check(fraction <= self.max_missing_fraction, || {
                format!(
                    "{fraction} > {} of the rows differ on a match of {n_matched} rows between \
                     {first} and {second}. {conditions}{}",
                    self.max_missing_fraction,
                    self.columns_description()
                )
            }),
        };
        Ok(finish(self.kind(), self.description(), verdict, vec![sql], Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection, table};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use std::sync::Arc;

    fn ints(values: Vec<Option<i64>>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    fn texts(values: &[&str]) -> ArrayRef {
        Arc::new(StringArray::from(values.to_vec()))
    }

    fn conn() -> crate::sources::DataFusionConnection {
        connection(vec![
            (
                "companies",
                batch(vec![
                    ("id", ints(vec![Some(1), Some(2), Some(3), Some(4)])),
                    ("name", texts(&["QuantCo", "Google", "BMW", "Apple"])),
                    ("size", ints(vec![Some(90), Some(200), None, Some(500)])),
                ]),
            ),
            (
                "archive",
                batch(vec![
                    ("id", ints(vec![Some(1), Some(2), Some(3)])),
                    ("name", texts(&["QuantCo", "Google", "BMW"])),
                    ("size", ints(vec![Some(100), Some(200), None])),
                ]),
            ),
        ])
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_row_subset_and_superset() {
        let conn = conn();
        let subset = RowSetComparison::new(
            RowSetCheck::Subset,
            columns("archive", &["id", "name"]),
            columns("companies", &["id", "name"]),
            Tolerance::Constant(0.0),
        );
        assert!(subset.test(&conn).await.unwrap().outcome);

        let superset = RowSetComparison::new(
            RowSetCheck::Superset,
            columns("archive", &["id", "name"]),
            columns("companies", &["id", "name"]),
            Tolerance::Constant(0.2),
        );
        let result = superset.test(&conn).await.unwrap();
        let message = result.failure_message().unwrap();
        assert!(message.starts_with("0.25 > 0.2 of rows of datafusion.public.companies's column(s) 'id', 'name' are not in"));
        assert!(message.contains("E.g. for id = 4 , name = Apple."));
        assert_eq!(result.factual_queries().len(), 2);
    }

    #[tokio::test]
    async fn test_row_equality() {
        let conn = conn();
        let equality = RowSetComparison::new(
            RowSetCheck::Equality,
            columns("companies", &["id", "size"]),
            columns("archive", &["id", "size"]),
            Tolerance::Constant(0.5),
        );
        let result = equality.test(&conn).await.unwrap();
        assert!(!result.outcome);
        // (1, 90), (4, 500) and (1, 100) differ among 5 distinct rows; NULLs match in EXCEPT.
        assert!(result
            .failure_message()
            .unwrap()
            .starts_with("0.6 > 0.5 of rows differ between datafusion.public.companies's column(s) 'id', 'size'"));

        let unbounded = RowSetComparison::new(
            RowSetCheck::Equality,
            table("companies"),
            table("archive"),
            Tolerance::Unbounded,
        );
        assert!(unbounded.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_row_matching_equality() {
        let conn = conn();
        let matching = RowMatchingEquality::new(
            table("companies"),
            table("archive"),
            (strings(&["id"]), strings(&["id"])),
            (strings(&["size"]), strings(&["size"])),
            0.4,
        )
        .unwrap();
        assert!(matching.test(&conn).await.unwrap().outcome);

        let strict = RowMatchingEquality::new(
            table("companies"),
            table("archive"),
            (strings(&["id"]), strings(&["id"])),
            (strings(&["size"]), strings(&["size"])),
            0.1,
        )
        .unwrap();
        let message = strict.test(&conn).await.unwrap().failure_message().unwrap();
        assert!(message.contains("of the rows differ on a match of 3 rows"));
        assert!(message.ends_with("Matched on ['id'] and ['id']. Compared on ['size'] and ['size']."));
    }

    #[test]
    fn test_row_matching_validation() {
        assert!(RowMatchingEquality::new(
            table("companies"),
            table("archive"),
            (strings(&["id"]), Vec::new()),
            (strings(&["size"]), strings(&["size"])),
            0.0,
        )
        .is_err());
    }
}
