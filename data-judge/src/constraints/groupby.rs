//! Group-wise continuity of an integer aggregation column.

use crate::core::{conditions_of, finish, Comparison, Constraint, TestResult};
use crate::error::{JudgeError, Result};
use crate::query;
use crate::sources::{Connection, DataReference, Value};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// Values of `start..=max(values)` that are absent from `values`.
pub fn missing_from_range(values: &BTreeSet<i64>, start: i64) -> Vec<i64> {
    match values.iter().next_back() {
        Some(&max) => (start..=max).filter(|v| !values.contains(v)).collect(),
        None => Vec::new(),
    }
}

/// Within every group of the reference's key columns, the aggregation column
/// must cover `start_value..=max` without holes.
///
/// The fraction of groups with holes may be at most `tolerance`.
#[derive(Debug)]
pub struct AggregateNumericRangeEquality {
    reference: DataReference,
    aggregation_column: String,
    start_value: i64,
    tolerance: f64,
    name: Option<String>,
}

impl AggregateNumericRangeEquality {
    pub fn new(
        reference: DataReference,
        aggregation_column: impl Into<String>,
        start_value: i64,
        tolerance: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(JudgeError::configuration(format!(
                "Tolerance must be within [0, 1], got {tolerance}"
            )));
        }
        if reference.columns().map_or(true, <[String]>::is_empty) {
            return Err(JudgeError::configuration(format!(
                "{} needs key columns to group by",
                reference.source()
            )));
        }
        Ok(Self {
            reference,
            aggregation_column: aggregation_column.into(),
            start_value,
            tolerance,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl Constraint for AggregateNumericRangeEquality {
    fn kind(&self) -> &'static str {
        "AggregateNumericRangeEquality"
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
        let value = self
            .reference
            .quote_columns(conn, std::slice::from_ref(&self.aggregation_column))
            .await?
            .remove(0);
        let keys = resolved.columns().to_vec();
        let sql = query::grouped_values(&resolved.with_projection(Vec::new()), &keys, &value)?;
        let rows = conn.query(&sql).await?;

        let mut groups: BTreeMap<Value, BTreeSet<i64>> = BTreeMap::new();
        for mut row in rows.rows {
            let Some(aggregated) = row.pop() else { continue };
            let number = aggregated.as_i64().ok_or_else(|| {
                JudgeError::configuration(format!(
                    "Column '{}' holds the non-integer value {}",
                    self.aggregation_column,
                    aggregated.repr()
                ))
            })?;
            groups.entry(Value::from_row(row)).or_default().insert(number);
        }

        let failed: Vec<(Value, Vec<i64>)> = groups
            .iter()
            .map(|(key, values)| (key.clone(), missing_from_range(values, self.start_value)))
            .filter(|(_, missing)| !missing.is_empty())
            .collect();
        debug!(groups = groups.len(), failed = failed.len(), "Checked group continuity");

        let ratio = if groups.is_empty() {
            0.0
        } else {
            failed.len() as f64 / groups.len() as f64
        };
        let comparison = Comparison::check(ratio <= self.tolerance, || {
            let listed = failed
                .iter()
                .map(|(key, missing)| {
                    let missing: Vec<String> = missing.iter().map(i64::to_string).collect();
                    format!("{}: [{}]", key.repr(), missing.join(", "))
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "{} has unfulfilled continuity requirement for (key, missing values): `{{{listed}}}`. {}",
                self.reference,
                conditions_of(self)
            )
        });
        Ok(finish(self.kind(), self.description(), comparison, vec![sql], Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use std::sync::Arc;

    fn conn() -> crate::sources::DataFusionConnection {
        let owner: ArrayRef = Arc::new(StringArray::from(vec!["a", "a", "a", "b", "b", "c"]));
        let version: ArrayRef = Arc::new(Int64Array::from(vec![
            Some(1),
            Some(2),
            Some(3),
            Some(1),
            Some(3),
            None,
        ]));
        connection(vec![(
            "versions",
            batch(vec![("owner", owner), ("version", version)]),
        )])
    }

    #[test]
    fn test_missing_from_range() {
        let values: BTreeSet<i64> = [1, 3, 4].into_iter().collect();
        assert_eq!(missing_from_range(&values, 1), vec![2]);
        assert_eq!(missing_from_range(&values, 0), vec![0, 2]);
        assert!(missing_from_range(&BTreeSet::new(), 0).is_empty());
    }

    #[tokio::test]
    async fn test_holes_fail() {
        let conn = conn();
        let check =
            AggregateNumericRangeEquality::new(columns("versions", &["owner"]), "version", 1, 0.0)
                .unwrap();
        let result = check.test(&conn).await.unwrap();
        assert_eq!(
            result.failure_message().as_deref(),
            Some(
                "datafusion.public.versions's column(s) 'owner' has unfulfilled continuity \
                 requirement for (key, missing values): `{'b': [2]}`."
            )
        );
    }

    #[tokio::test]
    async fn test_tolerance() {
        let conn = conn();
        // One of two non-empty groups has a hole.
        let check =
            AggregateNumericRangeEquality::new(columns("versions", &["owner"]), "version", 1, 0.5)
                .unwrap();
        assert!(check.test(&conn).await.unwrap().outcome);
    }

    #[test]
    fn test_validation() {
        assert!(
            AggregateNumericRangeEquality::new(columns("versions", &["owner"]), "version", 0, 1.5)
                .is_err()
        );
        assert!(AggregateNumericRangeEquality::new(
            crate::test_helpers::table("versions"),
            "version",
            0,
            0.0
        )
        .is_err());
    }
}
