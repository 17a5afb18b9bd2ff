//! Numeric aggregates: extrema, fraction within a range, mean and percentile.

use super::{fetch_count, fetch_scalar, target_prefix};
use crate::core::{
    conditions_of, Comparison, Constraint, ConstraintBase, Retrieval, Retrieve, TestResult,
};
use crate::error::{JudgeError, Result};
use crate::query::{self, Extremum};
use crate::sources::{Connection, DataReference, Value};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Smallest value whose rank `k` satisfies `k * 100 >= percentage * n`.
///
/// Ranks are 1-based over the ascending values, so `k = max(1, ceil(percentage * n / 100))`.
/// This is the definition the in-database query uses as well.
///
/// # Examples
///
/// ```rust
/// use data_judge::constraints::numeric::nearest_rank;
///
/// let values = [4.0, 1.0, 3.0, 2.0];
/// assert_eq!(nearest_rank(&values, 0.0), Some(1.0));
/// assert_eq!(nearest_rank(&values, 50.0), Some(2.0));
/// assert_eq!(nearest_rank(&values, 51.0), Some(3.0));
/// assert_eq!(nearest_rank(&values, 100.0), Some(4.0));
/// assert_eq!(nearest_rank(&[], 50.0), None);
/// ```
pub fn nearest_rank(values: &[f64], percentage: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let rank = ((percentage * n as f64) / 100.0).ceil().max(1.0) as usize;
    sorted.get(rank.min(n) - 1).copied()
}

/// Minimum or maximum of a numeric column.
#[derive(Debug)]
pub struct NumericExtremum {
    which: Extremum,
    base: ConstraintBase<Value>,
}

impl NumericExtremum {
    /// The column's extremum must not cross `value`: at least it for `Min`, at most for `Max`.
    pub fn within(which: Extremum, reference: DataReference, value: impl Into<Value>) -> Self {
        Self {
            which,
            base: ConstraintBase::within(reference, value.into()),
        }
    }

    pub fn between(which: Extremum, reference: DataReference, second: DataReference) -> Self {
        Self {
            which,
            base: ConstraintBase::between(reference, second),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }

    pub async fn last_values(&self) -> Option<(Value, Value)> {
        self.base.last_values().await
    }
}

#[async_trait]
impl Constraint for NumericExtremum {
    fn kind(&self) -> &'static str {
        match self.which {
            Extremum::Min => "NumericMin",
            Extremum::Max => "NumericMax",
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
impl Retrieve for NumericExtremum {
    type Value = Value;

    fn base(&self) -> &ConstraintBase<Value> {
        &self.base
    }

    #[instrument(skip(self, conn, reference), fields(constraint.kind = self.kind()))]
    async fn retrieve(&self, conn: &dyn Connection, reference: &DataReference) -> Result<Retrieval<Value>> {
        let resolved = reference.resolve(conn).await?;
        let sql = query::extremum(&resolved, self.which)?;
        let value = fetch_scalar(conn, &sql).await?;
        Ok(Retrieval::new(value, vec![sql]))
    }

    fn compare(&self, factual: &Value, target: &Value) -> Result<Comparison> {
        let reference = self.reference();
        let prefix = target_prefix(self.second_reference());
        let conditions = conditions_of(self);
        Ok(match self.which {
            Extremum::Min => {
                if target.is_null() {
                    return Ok(Comparison::Pass);
                }
                if factual.is_null() {
                    return Ok(Comparison::check(*target == Value::Int(0), || {
                        "Empty set.".to_string()
                    }));
                }
                Comparison::check(factual >= target, || {
                    format!("{reference} has min {factual} instead of {prefix}{target} . {conditions}")
                })
            }
            Extremum::Max => {
                if factual.is_null() {
                    return Ok(Comparison::Pass);
                }
                if target.is_null() {
                    return Ok(Comparison::check(*factual == Value::Int(0), || {
                        "Empty reference set.".to_string()
                    }));
                }
                Comparison::check(factual <= target, || {
                    format!("{reference} has max {factual} instead of {prefix}{target}. {conditions}")
                })
            }
        })
    }
}

/// Fraction of the selection's rows whose single column lies in `[lower, upper]`.
///
/// `None` when the selection is empty. Shared with the date family.
pub(crate) async fn fraction_between(
    conn: &dyn Connection,
    reference: &DataReference,
    lower: &Value,
    upper: &Value,
) -> Result<(Option<f64>, Vec<String>)> {
    let resolved = reference.resolve(conn).await?;
    let column = resolved.column()?.to_string();
    let dialect = resolved.dialect();
    let inside = resolved.with_predicate(&format!(
        "{column} >= {} AND {column} <= {}",
        dialect.literal(lower),
        dialect.literal(upper)
    ));
    let all_sql = query::row_count(&resolved, None);
    let inside_sql = query::row_count(&inside, None);
    let n_all = fetch_count(conn, &all_sql).await?;
    let n_inside = fetch_count(conn, &inside_sql).await?;
    debug!(n_all, n_inside, "Fraction between retrieved");
    let fraction = (n_all > 0).then(|| n_inside as f64 / n_all as f64);
    Ok((fraction, vec![all_sql, inside_sql]))
}

/// At least `min_fraction` of the rows lie within `[lower, upper]`.
#[derive(Debug)]
pub struct NumericBetween {
    lower: f64,
    upper: f64,
    base: ConstraintBase<Option<f64>>,
}

impl NumericBetween {
    pub fn new(reference: DataReference, lower: f64, upper: f64, min_fraction: f64) -> Result<Self> {
        if lower > upper {
            return Err(JudgeError::configuration(format!(
                "Lower bound {lower} exceeds upper bound {upper}"
            )));
        }
        if !(0.0..=1.0).contains(&min_fraction) {
            return Err(JudgeError::configuration(format!(
                "min_fraction has to be between 0 and 1, got {min_fraction}"
            )));
        }
        Ok(Self {
            lower,
            upper,
            base: ConstraintBase::within(reference, Some(min_fraction)),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }
}

#[async_trait]
impl Constraint for NumericBetween {
    fn kind(&self) -> &'static str {
        "NumericBetween"
    }

    fn reference(&self) -> &DataReference {
        self.base.reference()
    }

    fn name(&self) -> Option<&str> {
        self.base.name()
    }

    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        self.evaluate(conn).await
    }
}

#[async_trait]
impl Retrieve for NumericBetween {
    type Value = Option<f64>;

    fn base(&self) -> &ConstraintBase<Option<f64>> {
        &self.base
    }

    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Option<f64>>> {
        let (fraction, queries) = fraction_between(
            conn,
            reference,
            &Value::Float(self.lower),
            &Value::Float(self.upper),
        )
        .await?;
        Ok(Retrieval::new(fraction, queries))
    }

    fn compare(&self, factual: &Option<f64>, target: &Option<f64>) -> Result<Comparison> {
        let (Some(factual), Some(target)) = (factual, target) else {
            return Ok(Comparison::Pass);
        };
        let reference = self.reference();
        let conditions = conditions_of(self);
        Ok(Comparison::check(factual >= target, || {
            format!(
                "{reference} has {factual} < {target} of rows between {} and {}. {conditions}",
                self.lower, self.upper
            )
        }))
    }
}

/// Mean of a numeric column within an absolute deviation of the target.
#[derive(Debug)]
pub struct NumericMean {
    max_absolute_deviation: f64,
    base: ConstraintBase<Option<f64>>,
}

impl NumericMean {
    pub fn within(reference: DataReference, mean: f64, max_absolute_deviation: f64) -> Result<Self> {
        Ok(Self {
            max_absolute_deviation: check_deviation("max_absolute_deviation", max_absolute_deviation)?,
            base: ConstraintBase::within(reference, Some(mean)),
        })
    }

    pub fn between(
        reference: DataReference,
        second: DataReference,
        max_absolute_deviation: f64,
    ) -> Result<Self> {
        Ok(Self {
            max_absolute_deviation: check_deviation("max_absolute_deviation", max_absolute_deviation)?,
            base: ConstraintBase::between(reference, second),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }

    pub async fn last_values(&self) -> Option<(Option<f64>, Option<f64>)> {
        self.base.last_values().await
    }
}

fn check_deviation(what: &str, deviation: f64) -> Result<f64> {
    if deviation < 0.0 || deviation.is_nan() {
        return Err(JudgeError::configuration(format!(
            "{what} has to be non-negative, got {deviation}"
        )));
    }
    Ok(deviation)
}

#[async_trait]
impl Constraint for NumericMean {
    fn kind(&self) -> &'static str {
        "NumericMean"
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
impl Retrieve for NumericMean {
    type Value = Option<f64>;

    fn base(&self) -> &ConstraintBase<Option<f64>> {
        &self.base
    }

    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Option<f64>>> {
        let resolved = reference.resolve(conn).await?;
        let sql = query::mean(&resolved)?;
        let mean = fetch_scalar(conn, &sql).await?.as_f64();
        Ok(Retrieval::new(mean, vec![sql]))
    }

    fn compare(&self, factual: &Option<f64>, target: &Option<f64>) -> Result<Comparison> {
        let (factual, target) = match (factual, target) {
            (Some(f), Some(t)) => (*f, *t),
            (None, None) => return Ok(Comparison::Pass),
            _ => return Ok(Comparison::Fail("Mean over empty set.".to_string())),
        };
        let reference = self.reference();
        let prefix = target_prefix(self.second_reference());
        let conditions = conditions_of(self);
        let deviation = (factual - target).abs();
        Ok(Comparison::check(deviation <= self.max_absolute_deviation, || {
            format!(
                "{reference} has mean {factual}, deviating more than {} from {prefix} {target}. {conditions}",
                self.max_absolute_deviation
            )
        }))
    }
}

/// A percentile of a numeric column within an absolute and/or relative deviation.
///
/// The percentile is computed in the database when the dialect has window functions
/// and client side otherwise; both use [`nearest_rank`].
#[derive(Debug)]
pub struct NumericPercentile {
    percentage: f64,
    max_absolute_deviation: Option<f64>,
    max_relative_deviation: Option<f64>,
    base: ConstraintBase<Option<f64>>,
}

impl NumericPercentile {
    pub fn within(
        reference: DataReference,
        percentage: f64,
        expected_percentile: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
    ) -> Result<Self> {
        Self::new(
            ConstraintBase::within(reference, Some(expected_percentile)),
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
        )
    }

    pub fn between(
        reference: DataReference,
        second: DataReference,
        percentage: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
    ) -> Result<Self> {
        Self::new(
            ConstraintBase::between(reference, second),
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
        )
    }

    fn new(
        base: ConstraintBase<Option<f64>>,
        percentage: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
    ) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(JudgeError::configuration(format!(
                "Expected percentage to be a value between 0 and 100, got {percentage}."
            )));
        }
        if max_absolute_deviation.is_none() && max_relative_deviation.is_none() {
            return Err(JudgeError::configuration(
                "At least one of 'max_absolute_deviation' and 'max_relative_deviation' must be given.",
            ));
        }
        let max_absolute_deviation = max_absolute_deviation
            .map(|d| check_deviation("max_absolute_deviation", d))
            .transpose()?;
        let max_relative_deviation = max_relative_deviation
            .map(|d| check_deviation("max_relative_deviation", d))
            .transpose()?;
        Ok(Self {
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
            base,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub async fn last_values(&self) -> Option<(Option<f64>, Option<f64>)> {
        self.base.last_values().await
    }
}

#[async_trait]
impl Constraint for NumericPercentile {
    fn kind(&self) -> &'static str {
        "NumericPercentile"
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
impl Retrieve for NumericPercentile {
    type Value = Option<f64>;

    fn base(&self) -> &ConstraintBase<Option<f64>> {
        &self.base
    }

    #[instrument(skip(self, conn, reference), fields(constraint.kind = self.kind()))]
    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Option<f64>>> {
        let resolved = reference.resolve(conn).await?;
        if resolved.dialect().capabilities().window_functions {
            let sql = query::percentile(&resolved, self.percentage)?;
            let value = fetch_scalar(conn, &sql).await?.as_f64();
            return Ok(Retrieval::new(value, vec![sql]));
        }
        debug!(dialect = %resolved.dialect(), "Computing percentile client side");
        let sql = query::column_values(&resolved)?;
        let values: Vec<f64> = conn
            .query(&sql)
            .await?
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_f64))
            .collect();
        Ok(Retrieval::new(nearest_rank(&values, self.percentage), vec![sql]))
    }

    fn compare(&self, factual: &Option<f64>, target: &Option<f64>) -> Result<Comparison> {
        let (factual, target) = match (factual, target) {
            (Some(f), Some(t)) => (*f, *t),
            (None, None) => return Ok(Comparison::Pass),
            _ => return Ok(Comparison::Fail("Percentile over empty set.".to_string())),
        };
        let reference = self.reference();
        let prefix = target_prefix(self.second_reference());
        let percentage = self.percentage;
        let difference = (factual - target).abs();

        if let Some(max) = self.max_absolute_deviation {
            if difference > max {
                return Ok(Comparison::Fail(format!(
                    "The {percentage}-th percentile of {reference} was expected to be {prefix}{target} \
                     but was {factual}, resulting in an absolute difference of {difference}. \
                     The maximally allowed absolute deviation would've been {max}."
                )));
            }
        }
        if let Some(max) = self.max_relative_deviation {
            if target == 0.0 {
                return Err(JudgeError::configuration(
                    "Cannot compute a relative deviation from a target percentile of 0.",
                ));
            }
            let relative = difference / target.abs();
            if relative > max {
                return Ok(Comparison::Fail(format!(
                    "The {percentage}-th percentile of {reference} was expected to be {prefix}{target} \
                     but was {factual}, resulting in a relative difference of {relative}. \
                     The maximally allowed relative deviation would've been {max}."
                )));
            }
        }
        Ok(Comparison::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection};
    use arrow::array::{ArrayRef, Float64Array, Int64Array};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn conn() -> crate::sources::DataFusionConnection {
        let employees: ArrayRef = Arc::new(Int64Array::from(vec![
            Some(100),
            Some(200),
            Some(300),
            Some(400),
            None,
        ]));
        let scores: ArrayRef = Arc::new(Float64Array::from(vec![1.5, 2.5, 3.5, 4.5, 5.5]));
        let empty: ArrayRef = Arc::new(Int64Array::from(Vec::<Option<i64>>::new()));
        connection(vec![
            ("companies", batch(vec![("num_employees", employees), ("score", scores)])),
            ("nothing", batch(vec![("num_employees", empty)])),
        ])
    }

    fn employees() -> DataReference {
        columns("companies", &["num_employees"])
    }

    #[test]
    fn test_nearest_rank_boundaries() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(nearest_rank(&values, 0.0), Some(1.0));
        assert_eq!(nearest_rank(&values, 10.0), Some(1.0));
        assert_eq!(nearest_rank(&values, 10.1), Some(2.0));
        assert_eq!(nearest_rank(&values, 50.0), Some(5.0));
        assert_eq!(nearest_rank(&values, 100.0), Some(10.0));
        assert_eq!(nearest_rank(&[7.0], 0.5), Some(7.0));
    }

    proptest! {
        #[test]
        fn prop_nearest_rank_is_a_member_and_stable(
            values in prop::collection::vec(-1e6f64..1e6, 1..50),
            percentage in 0.0f64..=100.0,
        ) {
            let first = nearest_rank(&values, percentage);
            let second = nearest_rank(&values, percentage);
            prop_assert_eq!(first, second);
            let picked = first.unwrap();
            prop_assert!(values.contains(&picked));
            let at_or_below = values.iter().filter(|v| **v <= picked).count();
            prop_assert!(at_or_below as f64 * 100.0 >= percentage * values.len() as f64 - 1e-6);
        }
    }

    #[tokio::test]
    async fn test_numeric_min_and_max() {
        let conn = conn();
        let min = NumericExtremum::within(Extremum::Min, employees(), 1);
        assert!(min.test(&conn).await.unwrap().outcome);

        let min = NumericExtremum::within(Extremum::Min, employees(), 150);
        let result = min.test(&conn).await.unwrap();
        assert_eq!(
            result.failure_message().as_deref(),
            Some("datafusion.public.companies's column(s) 'num_employees' has min 100 instead of 150 .")
        );

        let max = NumericExtremum::within(Extremum::Max, employees(), 399);
        assert!(!max.test(&conn).await.unwrap().outcome);
        assert_eq!(
            max.last_values().await,
            Some((Value::Int(400), Value::Int(399)))
        );
    }

    #[tokio::test]
    async fn test_extremum_of_empty_selection() {
        let conn = conn();
        let nothing = columns("nothing", &["num_employees"]);
        let min = NumericExtremum::within(Extremum::Min, nothing.clone(), 0);
        assert!(min.test(&conn).await.unwrap().outcome);
        let min = NumericExtremum::within(Extremum::Min, nothing.clone(), 3);
        let result = min.test(&conn).await.unwrap();
        assert_eq!(result.failure_message().as_deref(), Some("Empty set."));
        let max = NumericExtremum::within(Extremum::Max, nothing, 3);
        assert!(max.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_numeric_between() {
        let conn = conn();
        let between = NumericBetween::new(employees(), 150.0, 450.0, 0.6).unwrap();
        assert!(between.test(&conn).await.unwrap().outcome);

        let between = NumericBetween::new(employees(), 150.0, 450.0, 0.7).unwrap();
        let result = between.test(&conn).await.unwrap();
        assert!(result
            .failure_message()
            .unwrap()
            .contains("has 0.6 < 0.7 of rows between 150 and 450."));
        assert_eq!(result.factual_queries().len(), 2);

        assert!(NumericBetween::new(employees(), 2.0, 1.0, 0.5).is_err());
    }

    #[tokio::test]
    async fn test_numeric_mean() {
        let conn = conn();
        let mean = NumericMean::within(employees(), 260.0, 10.0).unwrap();
        assert!(mean.test(&conn).await.unwrap().outcome);

        let mean = NumericMean::within(employees(), 200.0, 10.0).unwrap();
        let result = mean.test(&conn).await.unwrap();
        assert!(result
            .failure_message()
            .unwrap()
            .contains("has mean 250, deviating more than 10 from  200."));

        let scores = columns("companies", &["score"]);
        let between = NumericMean::between(scores.clone(), scores, 0.0).unwrap();
        assert!(between.test(&conn).await.unwrap().outcome);
        assert!(NumericMean::within(employees(), 1.0, -1.0).is_err());
    }

    #[test]
    fn test_percentile_validation() {
        assert!(NumericPercentile::within(employees(), 101.0, 1.0, Some(1.0), None).is_err());
        assert!(NumericPercentile::within(employees(), 50.0, 1.0, None, None).is_err());
        assert!(NumericPercentile::within(employees(), 50.0, 1.0, Some(-1.0), None).is_err());
        assert!(NumericPercentile::within(employees(), 50.0, 1.0, None, Some(0.1)).is_ok());
    }

    #[tokio::test]
    async fn test_percentile_boundaries() {
        let conn = conn();
        for (percentage, expected) in [(0.0, 100.0), (25.0, 100.0), (50.0, 200.0), (51.0, 300.0), (100.0, 400.0)] {
            let constraint =
                NumericPercentile::within(employees(), percentage, expected, Some(0.0), None).unwrap();
            let result = constraint.test(&conn).await.unwrap();
            assert!(result.outcome, "{percentage}: {:?}", result.failure_message());
        }
    }

    #[tokio::test]
    async fn test_percentile_failures() {
        let conn = conn();
        let absolute = NumericPercentile::within(employees(), 50.0, 190.0, Some(5.0), None).unwrap();
        let message = absolute.test(&conn).await.unwrap().failure_message().unwrap();
        assert!(message.starts_with("The 50-th percentile of datafusion.public.companies's column(s) 'num_employees' was expected to be 190 but was 200"));
        assert!(message.contains("absolute difference of 10"));

        let relative = NumericPercentile::within(employees(), 50.0, 100.0, None, Some(0.5)).unwrap();
        let message = relative.test(&conn).await.unwrap().failure_message().unwrap();
        assert!(message.contains("relative difference of 1"));

        let zero = NumericPercentile::within(employees(), 50.0, 0.0, None, Some(0.5)).unwrap();
        assert!(zero.test(&conn).await.is_err());
    }

    #[tokio::test]
    async fn test_percentile_is_idempotent() {
        let conn = conn();
        let constraint = NumericPercentile::within(employees(), 75.0, 300.0, Some(0.0), None).unwrap();
        constraint.test(&conn).await.unwrap();
        let first = constraint.last_values().await;
        constraint.test(&conn).await.unwrap();
        assert_eq!(constraint.last_values().await, first);
        assert_eq!(first, Some((Some(300.0), Some(300.0))));
    }
}
