//! Two-sample Kolmogorov-Smirnov test.
//!
//! The statistic `D` is the largest distance between the empirical CDFs of two
//! numeric samples. It is computed either in the database (cumulative
//! distribution window functions) or client side over the pulled samples. The
//! p-value uses the asymptotic Kolmogorov distribution.

use crate::core::{conditions_of, finish, Comparison, Constraint, TestResult};
use crate::error::{JudgeError, Result};
use crate::query;
use crate::sources::{Connection, DataReference, Resolved, Value};
use async_trait::async_trait;
use std::f64::consts::PI;
use tracing::{debug, instrument};

use super::{fetch_count, fetch_scalar};

/// Where the statistic is computed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum KsComputation {
    /// In the database when the dialect has window functions, else client side.
    #[default]
    Auto,
    InDatabase,
    ClientSide,
    /// Both paths; they must agree on `D` within the given absolute tolerance.
    CrossChecked(f64),
}

/// Survival function of the Kolmogorov distribution, `P(K > lambda)`.
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    if lambda < 1.18 {
        // 1 - sqrt(2 pi) / lambda * sum exp(-(2k - 1)^2 pi^2 / (8 lambda^2))
        let factor = -PI * PI / (8.0 * lambda * lambda);
        let sum: f64 = (1..=8)
            .map(|k| {
                let odd = (2 * k - 1) as f64;
                (odd * odd * factor).exp()
            })
            .sum();
        (1.0 - (2.0 * PI).sqrt() / lambda * sum).clamp(0.0, 1.0)
    } else {
        // 2 * sum (-1)^(k - 1) exp(-2 k^2 lambda^2)
        let sum: f64 = (1..=100)
            .map(|k| {
                let k = k as f64;
                let sign = if k as i64 % 2 == 1 { 1.0 } else { -1.0 };
                sign * (-2.0 * k * k * lambda * lambda).exp()
            })
            .sum();
        (2.0 * sum).clamp(0.0, 1.0)
    }
}

/// Asymptotic p-value of a two-sample statistic `d` over samples of sizes `n` and `m`.
pub fn kolmogorov_smirnov_p_value(d: f64, n: u64, m: u64) -> f64 {
    if n == 0 || m == 0 {
        return 1.0;
    }
    let (n, m) = (n as f64, m as f64);
    let lambda = (n * m / (n + m)).sqrt() * d;
    kolmogorov_survival(lambda)
}

/// Two-sample statistic over client-side samples. Sorts both in place.
pub fn ks_statistic(first: &mut [f64], second: &mut [f64]) -> f64 {
    first.sort_by(f64::total_cmp);
    second.sort_by(f64::total_cmp);
    let (n, m) = (first.len(), second.len());
    if n == 0 || m == 0 {
        return 0.0;
    }
    let (mut i, mut j, mut d) = (0, 0, 0.0_f64);
    while i < n && j < m {
        let x = first[i].min(second[j]);
        while i < n && first[i] <= x {
            i += 1;
        }
        while j < m && second[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n as f64 - j as f64 / m as f64).abs());
    }
    d
}

/// The two samples must plausibly come from the same distribution.
///
/// Fails when the p-value falls below `significance_level`. NULLs are excluded
/// from both samples.
#[derive(Debug)]
pub struct KolmogorovSmirnov2Sample {
    reference: DataReference,
    second: DataReference,
    significance_level: f64,
    computation: KsComputation,
    name: Option<String>,
}

impl KolmogorovSmirnov2Sample {
    pub fn new(reference: DataReference, second: DataReference, significance_level: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&significance_level) {
            return Err(JudgeError::configuration(format!(
                "Significance level must be within [0, 1], got {significance_level}"
            )));
        }
        reference.single_column()?;
        second.single_column()?;
        Ok(Self {
            reference,
            second,
            significance_level,
            computation: KsComputation::Auto,
            name: None,
        })
    }

    pub fn with_computation(mut self, computation: KsComputation) -> Result<Self> {
        if let KsComputation::CrossChecked(tolerance) = computation {
            if !(tolerance >= 0.0) {
                return Err(JudgeError::configuration(format!(
                    "Cross-check tolerance must be non-negative, got {tolerance}"
                )));
            }
        }
        self.computation = computation;
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn significance_level(&self) -> f64 {
        self.significance_level
    }

    async fn sample(conn: &dyn Connection, resolved: &Resolved) -> Result<(Vec<f64>, String)> {
        let sql = query::column_values(resolved)?;
        let values = conn
            .query(&sql)
            .await?
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_f64))
            .collect();
        Ok((values, sql))
    }

    /// `(D, n, m, queries)` computed client side.
    async fn client_side(
        conn: &dyn Connection,
        first: &Resolved,
        second: &Resolved,
    ) -> Result<(f64, u64, u64, Vec<String>)> {
        let ((mut a, sql_a), (mut b, sql_b)) =
            futures::try_join!(Self::sample(conn, first), Self::sample(conn, second))?;
        let d = ks_statistic(&mut a, &mut b);
        Ok((d, a.len() as u64, b.len() as u64, vec![sql_a, sql_b]))
    }

    async fn in_database(
        conn: &dyn Connection,
        first: &Resolved,
        second: &Resolved,
    ) -> Result<(f64, u64, u64, Vec<String>)> {
        let statistic = query::ks::ks_statistic(first, second)?;
        let count_a = query::non_null_count(first)?;
        let count_b = query::non_null_count(second)?;
        let (n, m) = futures::try_join!(fetch_count(conn, &count_a), fetch_count(conn, &count_b))?;
        let d = if n == 0 || m == 0 {
            0.0
        } else {
            fetch_scalar(conn, &statistic).await?.as_f64().unwrap_or(0.0)
        };
        Ok((d, n, m, vec![statistic, count_a, count_b]))
    }
}

#[async_trait]
impl Constraint for KolmogorovSmirnov2Sample {
    fn kind(&self) -> &'static str {
        "KolmogorovSmirnov2Sample"
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

    #[instrument(skip(self, conn), fields(constraint.kind = "KolmogorovSmirnov2Sample"))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let first = self.reference.resolve(conn).await?;
        let second = self.second.resolve(conn).await?;
        let dialect = conn.dialect();

        let computation = match self.computation {
            KsComputation::Auto if dialect.capabilities().window_functions => {
                KsComputation::InDatabase
            }
            KsComputation::Auto => KsComputation::ClientSide,
            other => other,
        };
        let (d, n, m, queries) = match computation {
            KsComputation::ClientSide => Self::client_side(conn, &first, &second).await?,
            KsComputation::CrossChecked(tolerance) => {
                let (db_d, n, m, mut queries) = Self::in_database(conn, &first, &second).await?;
                let (client_d, _, _, client_queries) =
                    Self::client_side(conn, &first, &second).await?;
                if (db_d - client_d).abs() > tolerance {
                    return Err(JudgeError::Internal(format!(
                        "Kolmogorov-Smirnov statistics disagree: {db_d} in the database, \
                         {client_d} client side"
                    )));
                }
                queries.extend(client_queries);
                (db_d, n, m, queries)
            }
            _ => Self::in_database(conn, &first, &second).await?,
        };
        debug!(statistic = d, n, m, "Computed Kolmogorov-Smirnov statistic");

        let comparison = if n == 0 || m == 0 {
            Comparison::Fail(format!(
                "2-Sample Kolmogorov-Smirnov between {} and {} needs non-empty samples, got {n} and {m} values.",
                self.reference, self.second
            ))
        } else {
            let p_value = kolmogorov_smirnov_p_value(d, n, m);
            Comparison::check(p_value >= self.significance_level, || {
                format!(
                    "2-Sample Kolmogorov-Smirnov between {} and {} has p-value {p_value} < {}. {}",
                    self.reference,
                    self.second,
                    self.significance_level,
                    conditions_of(self)
                )
            })
        };
        Ok(finish(self.kind(), self.description(), comparison, queries, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection};
    use arrow::array::{ArrayRef, Float64Array};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn sample(name: &'static str, values: Vec<Option<f64>>) -> (&'static str, arrow::record_batch::RecordBatch) {
        let array: ArrayRef = Arc::new(Float64Array::from(values));
        (name, batch(vec![("x", array)]))
    }

    fn conn() -> crate::sources::DataFusionConnection {
        let shifted = |offset: f64| (0..100).map(|i| Some(i as f64 + offset)).collect::<Vec<_>>();
        let mut with_nulls = shifted(0.0);
        with_nulls.extend([None, None]);
        connection(vec![
            sample("a", shifted(0.0)),
            sample("a_nulls", with_nulls),
            sample("b", shifted(10.0)),
            sample("far", shifted(1000.0)),
            sample("empty", Vec::new()),
        ])
    }

    #[test]
    fn test_p_value_reference_points() {
        assert_eq!(kolmogorov_smirnov_p_value(0.0, 10, 10), 1.0);
        let p = kolmogorov_smirnov_p_value(0.1528, 926, 926);
        assert!(p > 7.5e-10 && p < 9.0e-10, "p = {p}");
        // Both series meet at the switch point.
        let below = kolmogorov_survival(1.18 - 1e-9);
        let above = kolmogorov_survival(1.18);
        assert!((below - above).abs() < 1e-6);
        assert!((kolmogorov_survival(1.0) - 0.2699996716735).abs() < 1e-9);
    }

    #[test]
    fn test_client_statistic() {
        let mut a: Vec<f64> = (0..100).map(f64::from).collect();
        let mut b: Vec<f64> = (10..110).map(f64::from).collect();
        assert!((ks_statistic(&mut a, &mut b) - 0.1).abs() < 1e-12);

        let mut ties = vec![1.0, 1.0, 2.0];
        let mut same = vec![2.0, 1.0, 1.0];
        assert_eq!(ks_statistic(&mut ties, &mut same), 0.0);
    }

    #[tokio::test]
    async fn test_similar_samples_pass() {
        let conn = conn();
        let ks = KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns("b", &["x"]), 0.05)
            .unwrap();
        let result = ks.test(&conn).await.unwrap();
        assert!(result.outcome);
        assert_eq!(
            ks.description(),
            "KolmogorovSmirnov2Sample::a's column(s) 'x' | b's column(s) 'x'"
        );
    }

    #[tokio::test]
    async fn test_disjoint_samples_fail() {
        let conn = conn();
        let ks = KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns("far", &["x"]), 0.05)
            .unwrap();
        let result = ks.test(&conn).await.unwrap();
        let message = result.failure_message().unwrap();
        assert!(message.starts_with(
            "2-Sample Kolmogorov-Smirnov between datafusion.public.a's column(s) 'x' and \
             datafusion.public.far's column(s) 'x' has p-value"
        ));
        assert!(message.ends_with("< 0.05."));
    }

    #[tokio::test]
    async fn test_paths_agree() {
        let conn = conn();
        for other in ["b", "far", "a_nulls"] {
            let ks = KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns(other, &["x"]), 0.05)
                .unwrap()
                .with_computation(KsComputation::CrossChecked(1e-9))
                .unwrap();
            let result = ks.test(&conn).await.unwrap();
            assert_eq!(result.factual_queries().len(), 5);
        }
        let nulls = KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns("a_nulls", &["x"]), 0.05)
            .unwrap()
            .with_computation(KsComputation::ClientSide)
            .unwrap();
        assert!(nulls.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_empty_sample_fails() {
        let conn = conn();
        let ks = KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns("empty", &["x"]), 0.05)
            .unwrap();
        let result = ks.test(&conn).await.unwrap();
        assert!(result.failure_message().unwrap().contains("needs non-empty samples"));
    }

    #[test]
    fn test_validation() {
        assert!(KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns("b", &["x"]), 1.5).is_err());
        assert!(KolmogorovSmirnov2Sample::new(columns("a", &["x", "y"]), columns("b", &["x"]), 0.05).is_err());
        let ks = KolmogorovSmirnov2Sample::new(columns("a", &["x"]), columns("b", &["x"]), 0.05).unwrap();
        assert!(ks.with_computation(KsComputation::CrossChecked(-1.0)).is_err());
    }

    proptest! {
        #[test]
        fn prop_statistic_is_a_distance(
            a in proptest::collection::vec(-1e3f64..1e3, 1..40),
            b in proptest::collection::vec(-1e3f64..1e3, 1..40),
        ) {
            let (mut a1, mut b1) = (a.clone(), b.clone());
            let (mut a2, mut b2) = (a.clone(), b.clone());
            let forward = ks_statistic(&mut a1, &mut b1);
            let backward = ks_statistic(&mut b2, &mut a2);
            prop_assert!((0.0..=1.0).contains(&forward));
            prop_assert!((forward - backward).abs() < 1e-12);
            let mut self_a = a.clone();
            let mut self_b = a;
            prop_assert_eq!(ks_statistic(&mut self_a, &mut self_b), 0.0);
        }
    }
}
