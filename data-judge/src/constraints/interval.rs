//! Gap and overlap detection over numeric and date intervals.
//!
//! Violations are counted per key group. The check passes while the fraction of
//! key groups with at least one violation stays at or below
//! `max_relative_n_violations`.

use super::{fetch_count, format_sample};
use crate::core::{finish, Comparison, Constraint, TestResult};
use crate::error::{JudgeError, Result};
use crate::query::interval::{self, GapKind, IntervalColumns, IntervalQueries};
use crate::sources::{Connection, DataReference};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Value domain of the interval bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Numeric,
    Date,
}

/// Columns and tolerance shared by both interval checks.
#[derive(Debug, Clone)]
struct IntervalCheck {
    kind: IntervalKind,
    reference: DataReference,
    key_columns: Vec<String>,
    start_columns: Vec<String>,
    end_columns: Vec<String>,
    max_relative_n_violations: f64,
    name: Option<String>,
}

impl IntervalCheck {
    fn new(
        kind: IntervalKind,
        reference: DataReference,
        key_columns: Vec<String>,
        start_columns: Vec<String>,
        end_columns: Vec<String>,
        max_relative_n_violations: f64,
    ) -> Result<Self> {
        if start_columns.len() != end_columns.len() || start_columns.is_empty() {
            return Err(JudgeError::configuration(format!(
                "Expected as many start as end columns, got {} and {}.",
                start_columns.len(),
                end_columns.len()
            )));
        }
        if !(0.0..=1.0).contains(&max_relative_n_violations) {
            return Err(JudgeError::configuration(format!(
                "max_relative_n_violations has to be between 0 and 1, got {max_relative_n_violations}"
            )));
        }
        Ok(Self {
            kind,
            reference,
            key_columns,
            start_columns,
            end_columns,
            max_relative_n_violations,
            name: None,
        })
    }

    async fn columns(&self, conn: &dyn Connection) -> Result<IntervalColumns> {
        let reference = &self.reference;
        IntervalColumns::new(
            reference.quote_columns(conn, &self.key_columns).await?,
            reference.quote_columns(conn, &self.start_columns).await?,
            reference.quote_columns(conn, &self.end_columns).await?,
        )
    }

    /// Runs the queries and judges the violation ratio.
    async fn run(
        &self,
        conn: &dyn Connection,
        kind: &str,
        description: String,
        queries: IntervalQueries,
        violation: &str,
    ) -> Result<TestResult> {
        let n_keys = fetch_count(conn, &queries.key_count).await?;
        let n_violations = fetch_count(conn, &queries.violation_count).await?;
        debug!(n_keys, n_violations, "Interval violations counted");

        let comparison = if n_keys == 0 {
            Comparison::Pass
        } else {
            let ratio = n_violations as f64 / n_keys as f64;
            if ratio <= self.max_relative_n_violations {
                Comparison::Pass
            } else {
                let sample = format_sample(&conn.query(&queries.sample).await?);
                let ranges = self
                    .start_columns
                    .iter()
                    .zip(&self.end_columns)
                    .map(|(s, e)| format!("{s} and {e}"))
                    .collect::<Vec<_>>()
                    .join(" and in ");
                let keys = self
                    .key_columns
                    .iter()
                    .map(|k| format!("'{k}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Comparison::Fail(format!(
                    "{} has a ratio of {ratio} > {} keys in columns [{keys}] with {violation} in {ranges}. \
                     E.g. for: {sample}.",
                    self.reference, self.max_relative_n_violations
                ))
            }
        };
        Ok(finish(
            kind,
            description,
            comparison,
            vec![queries.key_count, queries.sample, queries.violation_count],
            Vec::new(),
        ))
    }
}

/// No two intervals of the same key group intersect.
///
/// One or two dimensions; two-dimensional intervals overlap when they intersect in
/// both dimensions.
#[derive(Debug, Clone)]
pub struct NoOverlap {
    check: IntervalCheck,
    end_included: bool,
}

impl NoOverlap {
    pub fn new(
        kind: IntervalKind,
        reference: DataReference,
        key_columns: Vec<String>,
        start_columns: Vec<String>,
        end_columns: Vec<String>,
        end_included: bool,
        max_relative_n_violations: f64,
    ) -> Result<Self> {
        let check = IntervalCheck::new(
            kind,
            reference,
            key_columns,
            start_columns,
            end_columns,
            max_relative_n_violations,
        )?;
        match (kind, check.start_columns.len()) {
            (_, 1) | (IntervalKind::Date, 2) => {}
            (_, dimensions) => {
                return Err(JudgeError::configuration(format!(
                    "{kind:?} overlaps are not defined for {dimensions} dimensions"
                )))
            }
        }
        Ok(Self {
            check,
            end_included,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.check.name = Some(name.into());
        self
    }
}

#[async_trait]
impl Constraint for NoOverlap {
    fn kind(&self) -> &'static str {
        match (self.check.kind, self.check.start_columns.len()) {
            (IntervalKind::Numeric, _) => "NumericNoOverlap",
            (IntervalKind::Date, 1) => "DateNoOverlap",
            (IntervalKind::Date, _) => "DateNoOverlap2d",
        }
    }

    fn reference(&self) -> &DataReference {
        &self.check.reference
    }

    fn name(&self) -> Option<&str> {
        self.check.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let resolved = self.check.reference.resolve(conn).await?;
        let columns = self.check.columns(conn).await?;
        let queries = interval::overlaps(&resolved, &columns, self.end_included)?;
        let violation = match self.check.kind {
            IntervalKind::Numeric => "overlapping ranges",
            IntervalKind::Date => "overlapping date ranges",
        };
        self.check
            .run(conn, self.kind(), self.description(), queries, violation)
            .await
    }
}

/// Consecutive intervals of the same key group leave no gap wider than the
/// legitimate gap size.
///
/// Without key columns the whole selection is one group; other columns of the
/// source never act as implicit keys.
#[derive(Debug, Clone)]
pub struct NoGap {
    check: IntervalCheck,
    legitimate_gap_size: f64,
}

impl NoGap {
    pub fn numeric(
        reference: DataReference,
        key_columns: Vec<String>,
        start_column: impl Into<String>,
        end_column: impl Into<String>,
        legitimate_gap_size: f64,
        max_relative_n_violations: f64,
    ) -> Result<Self> {
        if legitimate_gap_size < 0.0 {
            return Err(JudgeError::configuration(format!(
                "legitimate_gap_size has to be non-negative, got {legitimate_gap_size}"
            )));
        }
        Ok(Self {
            check: IntervalCheck::new(
                IntervalKind::Numeric,
                reference,
                key_columns,
                vec![start_column.into()],
                vec![end_column.into()],
                max_relative_n_violations,
            )?,
            legitimate_gap_size,
        })
    }

    /// With `end_included`, an interval ending the day before the next one starts
    /// leaves no gap.
    pub fn date(
        reference: DataReference,
        key_columns: Vec<String>,
        start_column: impl Into<String>,
        end_column: impl Into<String>,
        end_included: bool,
        max_relative_n_violations: f64,
    ) -> Result<Self> {
        Ok(Self {
            check: IntervalCheck::new(
                IntervalKind::Date,
                reference,
                key_columns,
                vec![start_column.into()],
                vec![end_column.into()],
                max_relative_n_violations,
            )?,
            legitimate_gap_size: if end_included { 1.0 } else { 0.0 },
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.check.name = Some(name.into());
        self
    }

    pub fn legitimate_gap_size(&self) -> f64 {
        self.legitimate_gap_size
    }
}

#[async_trait]
impl Constraint for NoGap {
    fn kind(&self) -> &'static str {
        match self.check.kind {
            IntervalKind::Numeric => "NumericNoGap",
            IntervalKind::Date => "DateNoGap",
        }
    }

    fn reference(&self) -> &DataReference {
        &self.check.reference
    }

    fn name(&self) -> Option<&str> {
        self.check.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let resolved = self.check.reference.resolve(conn).await?;
        let columns = self.check.columns(conn).await?;
        let (gap_kind, violation) = match self.check.kind {
            IntervalKind::Numeric => (GapKind::Numeric, "a gap in the range"),
            IntervalKind::Date => (GapKind::Date, "a gap in the date range"),
        };
        let queries = interval::gaps(&resolved, &columns, gap_kind, self.legitimate_gap_size)?;
        self.check
            .run(conn, self.kind(), self.description(), queries, violation)
            .await
    }
}
