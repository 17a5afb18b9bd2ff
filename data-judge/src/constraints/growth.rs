//! Relative gain and loss of row or unique counts between two references.
//!
//! The allowed change comes from a [`Tolerance`], which may need its own queries
//! (date spans), so these constraints resolve it inside `test()`.

use super::{fetch_count, percent};
use crate::core::{conditions_of, finish, Comparison, Constraint, TestResult, Tolerance};
use crate::error::Result;
use crate::query;
use crate::sources::{Connection, DataReference};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Direction and sense of the bound on the relative change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeBound {
    /// `(target - factual) / target` must not exceed the tolerance.
    MaxLoss,
    /// `(factual - target) / target` must not exceed the tolerance.
    MaxGain,
    /// `(factual - target) / target` must reach the tolerance.
    MinGain,
}

/// What is counted on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    Rows,
    /// Distinct tuples of the reference's columns.
    Uniques,
}

/// Bounds the relative change of a count from the second reference to the first.
#[derive(Debug)]
pub struct RelativeChange {
    bound: ChangeBound,
    measure: Measure,
    reference: DataReference,
    second: DataReference,
    tolerance: Tolerance,
    name: Option<String>,
}

impl RelativeChange {
    pub fn new(
        bound: ChangeBound,
        measure: Measure,
        reference: DataReference,
        second: DataReference,
        tolerance: Tolerance,
    ) -> Self {
        Self {
            bound,
            measure,
            reference,
            second,
            tolerance,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tolerance(&self) -> &Tolerance {
        &self.tolerance
    }

    async fn count(&self, conn: &dyn Connection, reference: &DataReference) -> Result<(u64, String)> {
        let resolved = reference.resolve(conn).await?;
        let sql = match self.measure {
            Measure::Rows => query::row_count(&resolved, None),
            Measure::Uniques => query::distinct_row_count(&resolved),
        };
        let count = fetch_count(conn, &sql).await?;
        Ok((count, sql))
    }

    /// Applies the bound to a factual and a target count.
    pub fn judge(&self, factual: u64, target: u64, limit: f64) -> Comparison {
        let (f, t) = (factual as f64, target as f64);
        let reference = &self.reference;
        let second = &self.second;
        let conditions = conditions_of(self);
        match (self.measure, self.bound) {
            (Measure::Uniques, ChangeBound::MaxGain) if target == 0 => {
                Comparison::Fail("Target table empty.".to_string())
            }
            _ if target == 0 => Comparison::Pass,
            (_, ChangeBound::MaxLoss) if factual > target => Comparison::Pass,
            (_, ChangeBound::MaxGain) if factual < target => Comparison::Pass,
            (_, ChangeBound::MinGain) if factual < target => {
                Comparison::Fail("Row loss.".to_string())
            }
            (Measure::Rows, ChangeBound::MaxLoss) => {
                let loss = (t - f) / t;
                Comparison::check(loss <= limit, || {
                    format!(
                        "The #rows from {reference} have decreased by {} compared to table {second}. \
                         They were expected to decrease by at most {}. {conditions}",
                        percent(loss),
                        percent(limit)
                    )
                })
            }
            (Measure::Rows, ChangeBound::MaxGain) => {
                let gain = (f - t) / t;
                Comparison::check(gain <= limit, || {
                    format!(
                        "{reference} has {} gain in #rows compared to {second}. \
                         It was only allowed to increase by {}. {conditions}",
                        percent(gain),
                        percent(limit)
                    )
                })
            }
            (Measure::Rows, ChangeBound::MinGain) => {
                let gain = (f - t) / t;
                Comparison::check(gain >= limit, || {
                    format!(
                        "{reference} has {} gain in #rows compared to {second}. \
                         It was supposed to increase at least by {}. {conditions}",
                        percent(gain),
                        percent(limit)
                    )
                })
            }
            (Measure::Uniques, ChangeBound::MaxLoss) => {
                let loss = (t - f) / t;
                Comparison::check(loss <= limit, || {
                    format!(
                        "{reference} has lost {loss} of #uniques of table {second}. \
                         It was only allowed to decrease {limit}. {conditions}"
                    )
                })
            }
            (Measure::Uniques, ChangeBound::MaxGain) => {
                let gain = (f - t) / t;
                Comparison::check(gain <= limit, || {
                    format!(
                        "{reference} has {gain} of #uniques of {second}. \
                         It was only allowed to increase {limit}. {conditions}"
                    )
                })
            }
            (Measure::Uniques, ChangeBound::MinGain) => {
                let gain = (f - t) / t;
                Comparison::check(gain >= limit, || {
                    format!(
                        "{reference} has {gain} gain of #uniques compared to {second}. \
                         It was supposed to increase at least by {limit}. {conditions}"
                    )
                })
            }
        }
    }
}

#[async_trait]
impl Constraint for RelativeChange {
    fn kind(&self) -> &'static str {
        match (self.measure, self.bound) {
            (Measure::Rows, ChangeBound::MaxLoss) => "NRowsMaxLoss",
            (Measure::Rows, ChangeBound::MaxGain) => "NRowsMaxGain",
            (Measure::Rows, ChangeBound::MinGain) => "NRowsMinGain",
            (Measure::Uniques, ChangeBound::MaxLoss) => "NUniquesMaxLoss",
            (Measure::Uniques, ChangeBound::MaxGain) => "NUniquesMaxGain",
            (Measure::Uniques, ChangeBound::MinGain) => "NUniquesMinGain",
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
        let (factual, factual_sql) = self.count(conn, &self.reference).await?;
        let (target, target_sql) = self.count(conn, &self.second).await?;
        let (limit, tolerance_queries) =
            self.tolerance.resolve(conn, &self.reference, &self.second).await?;
        debug!(factual, target, limit = ?limit, "Counts retrieved");

        let comparison = match limit {
            None => Comparison::Pass,
            Some(limit) => self.judge(factual, target, limit),
        };
        let mut target_queries = vec![target_sql];
        target_queries.extend(tolerance_queries);
        Ok(finish(
            self.kind(),
            self.description(),
            comparison,
            vec![factual_sql],
            target_queries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection, table};
    use arrow::array::{ArrayRef, Int64Array};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn change(bound: ChangeBound, measure: Measure) -> RelativeChange {
        RelativeChange::new(bound, measure, table("new"), table("old"), Tolerance::Unbounded)
    }

    fn values(values: Vec<i64>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    #[test]
    fn test_empty_target() {
        assert!(change(ChangeBound::MaxLoss, Measure::Rows).judge(3, 0, 0.0).is_pass());
        assert!(change(ChangeBound::MinGain, Measure::Rows).judge(3, 0, 0.5).is_pass());
        assert_eq!(
            change(ChangeBound::MaxGain, Measure::Uniques).judge(3, 0, 0.5),
            Comparison::Fail("Target table empty.".to_string())
        );
    }

    #[test]
    fn test_min_gain_row_loss() {
        assert_eq!(
            change(ChangeBound::MinGain, Measure::Rows).judge(9, 10, 0.0),
            Comparison::Fail("Row loss.".to_string())
        );
        assert!(change(ChangeBound::MaxGain, Measure::Rows).judge(9, 10, 0.0).is_pass());
    }

    #[test]
    fn test_loss_message() {
        let comparison = change(ChangeBound::MaxLoss, Measure::Rows).judge(3, 4, 0.2);
        let Comparison::Fail(message) = comparison else {
            panic!("expected a failure");
        };
        assert!(message.starts_with(
            "The #rows from datafusion.public.new have decreased by 25.000000% compared to table datafusion.public.old."
        ));
        assert!(message.contains("at most 20.000000%"));
    }

    proptest! {
        #[test]
        fn prop_min_gain_boundary(target in 1u64..10_000, gain_pct in 0u64..300) {
            let factual = target + target * gain_pct / 100;
            let exact = (factual - target) as f64 / target as f64;
            let constraint = change(ChangeBound::MinGain, Measure::Rows);
            prop_assert!(constraint.judge(factual, target, exact).is_pass());
            prop_assert!(!constraint.judge(factual, target, exact + 1e-6).is_pass());
        }

        #[test]
        fn prop_max_gain_boundary(target in 1u64..10_000, gain_pct in 0u64..300) {
            let factual = target + target * gain_pct / 100;
            let exact = (factual - target) as f64 / target as f64;
            let constraint = change(ChangeBound::MaxGain, Measure::Rows);
            prop_assert!(constraint.judge(factual, target, exact).is_pass());
            if factual > target {
                prop_assert!(!constraint.judge(factual, target, exact - 1e-6).is_pass());
            }
        }
    }

    #[tokio::test]
    async fn test_constant_tolerance_end_to_end() {
        let conn = connection(vec![
            ("new", batch(vec![("v", values(vec![1, 2, 3, 3]))])),
            ("old", batch(vec![("v", values(vec![1, 2, 3, 4, 5]))])),
        ]);
        let loss = RelativeChange::new(
            ChangeBound::MaxLoss,
            Measure::Rows,
            table("new"),
            table("old"),
            Tolerance::Constant(0.1),
        );
        let result = loss.test(&conn).await.unwrap();
        assert!(!result.outcome);
        assert_eq!(loss.description(), "NRowsMaxLoss::new | old");

        let unique_loss = RelativeChange::new(
            ChangeBound::MaxLoss,
            Measure::Uniques,
            columns("new", &["v"]),
            columns("old", &["v"]),
            Tolerance::Constant(0.4),
        );
        assert!(unique_loss.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_unbounded_always_passes() {
        let conn = connection(vec![
            ("new", batch(vec![("v", values(vec![1]))])),
            ("old", batch(vec![("v", values(vec![1, 2, 3]))])),
        ]);
        let result = change(ChangeBound::MaxLoss, Measure::Rows).test(&conn).await.unwrap();
        assert!(result.outcome);
    }
}
