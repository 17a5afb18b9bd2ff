//! String column constraints: regular expressions and lengths.

use super::uniques::retrieve_uniques;
use super::{fetch_count, fetch_scalar, target_prefix};
use crate::core::{
    conditions_of, finish, Comparison, Constraint, ConstraintBase, Retrieval, Retrieve, TestResult,
};
use crate::error::{JudgeError, Result};
use crate::formatters::format_values;
use crate::query::{self, Extremum};
use crate::sources::{count_of, Connection, DataReference, Value};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const NONE_NOT_ALLOWED: &str = "The column contains a None value when it's not allowed. \
                                To ignore None values, please use `allow_none=True` option.";

/// Options of the regex checks.
///
/// # Examples
///
/// ```rust
/// use data_judge::constraints::varchar::RegexOptions;
///
/// let options = RegexOptions::default()
///     .with_relative_tolerance(0.05)
///     .with_n_counterexamples(-1);
/// assert!(options.aggregated);
/// assert!(!options.allow_none);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexOptions {
    /// Ignore `NULL`s instead of failing on them.
    pub allow_none: bool,
    /// Fraction of violations tolerated.
    pub relative_tolerance: f64,
    /// Count distinct values instead of rows.
    pub aggregated: bool,
    /// Counterexamples listed on failure; -1 lists all, 0 none.
    pub n_counterexamples: i64,
}

impl Default for RegexOptions {
    fn default() -> Self {
        Self {
            allow_none: false,
            relative_tolerance: 0.0,
            aggregated: true,
            n_counterexamples: 5,
        }
    }
}

impl RegexOptions {
    pub fn with_allow_none(mut self, allow_none: bool) -> Self {
        self.allow_none = allow_none;
        self
    }

    pub fn with_relative_tolerance(mut self, tolerance: f64) -> Self {
        self.relative_tolerance = tolerance;
        self
    }

    pub fn with_aggregated(mut self, aggregated: bool) -> Self {
        self.aggregated = aggregated;
        self
    }

    pub fn with_n_counterexamples(mut self, n: i64) -> Self {
        self.n_counterexamples = n;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_counterexamples < -1 {
            return Err(JudgeError::configuration(format!(
                "Unexpected number of counterexamples: {}",
                self.n_counterexamples
            )));
        }
        if !(0.0..=1.0).contains(&self.relative_tolerance) {
            return Err(JudgeError::configuration(format!(
                "relative_tolerance has to be between 0 and 1, got {}",
                self.relative_tolerance
            )));
        }
        Ok(())
    }

    /// Row limit of the counterexample query; `None` lists all of them.
    fn counterexample_limit(&self) -> Option<usize> {
        usize::try_from(self.n_counterexamples).ok()
    }
}

fn regex_failure(
    reference: &DataReference,
    pattern: &str,
    options: &RegexOptions,
    n_violations: u64,
    n_total: u64,
    counterexamples: &[Value],
    conditions: &str,
) -> Comparison {
    let relative = if n_total == 0 {
        0.0
    } else {
        n_violations as f64 / n_total as f64
    };
    Comparison::check(relative <= options.relative_tolerance, || {
        format!(
            "{reference} breaks regex '{pattern}' in {relative} > {} of the cases. \
             In absolute terms, {n_violations} of the {n_total} samples violated the regex. \
             Some counterexamples consist of the following: {}. {conditions}",
            options.relative_tolerance,
            format_values(counterexamples)
        )
    })
}

/// Values of a string column match a regular expression, evaluated client side
/// over the column's unique values.
///
/// A value matches when the pattern matches starting at its first character.
#[derive(Debug)]
pub struct VarCharRegex {
    reference: DataReference,
    pattern: String,
    options: RegexOptions,
    name: Option<String>,
}

impl VarCharRegex {
    pub fn new(reference: DataReference, pattern: impl Into<String>, options: RegexOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            reference,
            pattern: pattern.into(),
            options,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn compile(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})", self.pattern)).map_err(|e| {
            JudgeError::configuration(format!("Invalid regex '{}': {e}", self.pattern))
        })
    }
}

#[async_trait]
impl Constraint for VarCharRegex {
    fn kind(&self) -> &'static str {
        "VarCharRegex"
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let (mut uniques, sql) = retrieve_uniques(conn, &self.reference, false).await?;
        let queries = vec![sql];
        let done = |comparison: Comparison| -> Result<TestResult> {
            Ok(finish(
                self.kind(),
                self.description(),
                comparison,
                queries.clone(),
                Vec::new(),
            ))
        };

        if uniques.get(&Value::Null).is_some_and(|n| *n > 0) && !self.options.allow_none {
            return done(Comparison::Fail(NONE_NOT_ALLOWED.to_string()));
        }
        uniques.remove(&Value::Null);
        if self.pattern.is_empty() {
            return done(Comparison::Fail("No regex pattern given".to_string()));
        }

        let regex = self.compile()?;
        let mismatching: Vec<(&Value, u64)> = uniques
            .iter()
            .filter(|(value, _)| !regex.is_match(&value.to_string()))
            .map(|(value, count)| (value, *count))
            .collect();
        let (n_violations, n_total) = if self.options.aggregated {
            (mismatching.len() as u64, uniques.len() as u64)
        } else {
            (
                mismatching.iter().map(|(_, n)| n).sum(),
                uniques.values().sum(),
            )
        };
        debug!(n_violations, n_total, "Regex mismatches counted");

        let counterexamples: Vec<Value> = mismatching
            .iter()
            .take(self.options.counterexample_limit().unwrap_or(usize::MAX))
            .map(|(value, _)| (*value).clone())
            .collect();
        done(regex_failure(
            &self.reference,
            &self.pattern,
            &self.options,
            n_violations,
            n_total,
            &counterexamples,
            &conditions_of(self),
        ))
    }
}

/// Like [`VarCharRegex`], with matching and counting done by the database.
#[derive(Debug)]
pub struct VarCharRegexDb {
    reference: DataReference,
    pattern: String,
    options: RegexOptions,
    name: Option<String>,
}

impl VarCharRegexDb {
    pub fn new(reference: DataReference, pattern: impl Into<String>, options: RegexOptions) -> Result<Self> {
        options.validate()?;
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(JudgeError::configuration("No regex pattern given"));
        }
        Ok(Self {
            reference,
            pattern,
            options,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl Constraint for VarCharRegexDb {
    fn kind(&self) -> &'static str {
        "VarCharRegexDb"
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
        let mut queries = Vec::new();

        if !self.options.allow_none {
            let sql = query::null_counts(&resolved)?;
            let n_null = conn.query(&sql).await?.first_row_value(1);
            queries.push(sql);
            if count_of(&n_null)? > 0 {
                return Ok(finish(
                    self.kind(),
                    self.description(),
                    Comparison::Fail(NONE_NOT_ALLOWED.to_string()),
                    queries,
                    Vec::new(),
                ));
            }
        }

        let aggregated = self.options.aggregated;
        let violations_sql = query::regex_violation_count(&resolved, &self.pattern, aggregated)?;
        let total_sql = query::regex_total_count(&resolved, aggregated)?;
        let n_violations = fetch_count(conn, &violations_sql).await?;
        let n_total = fetch_count(conn, &total_sql).await?;
        queries.push(violations_sql);
        queries.push(total_sql);

        let counterexamples = match self.options.n_counterexamples {
            0 => Vec::new(),
            _ if n_violations == 0 => Vec::new(),
            _ => {
                let sql = query::regex_violation_sample(
                    &resolved,
                    &self.pattern,
                    self.options.counterexample_limit(),
                )?;
                let rows = conn.query(&sql).await?;
                queries.push(sql);
                let mut values: Vec<Value> =
                    rows.rows.into_iter().filter_map(|row| row.into_iter().next()).collect();
                values.sort();
                values
            }
        };
        let comparison = regex_failure(
            &self.reference,
            &self.pattern,
            &self.options,
            n_violations,
            n_total,
            &counterexamples,
            &conditions_of(self),
        );
        Ok(finish(self.kind(), self.description(), comparison, queries, Vec::new()))
    }
}

/// Shortest or longest string of a column against a length bound.
#[derive(Debug)]
pub struct VarCharLength {
    which: Extremum,
    base: ConstraintBase<Option<i64>>,
}

impl VarCharLength {
    pub fn within(which: Extremum, reference: DataReference, length: i64) -> Self {
        Self {
            which,
            base: ConstraintBase::within(reference, Some(length)),
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
}

#[async_trait]
impl Constraint for VarCharLength {
    fn kind(&self) -> &'static str {
        match self.which {
            Extremum::Min => "VarCharMinLength",
            Extremum::Max => "VarCharMaxLength",
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
impl Retrieve for VarCharLength {
    type Value = Option<i64>;

    fn base(&self) -> &ConstraintBase<Option<i64>> {
        &self.base
    }

    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Option<i64>>> {
        let resolved = reference.resolve(conn).await?;
        let sql = query::length_extremum(&resolved, self.which)?;
        let length = fetch_scalar(conn, &sql).await?.as_i64();
        Ok(Retrieval::new(length, vec![sql]))
    }

    fn compare(&self, factual: &Option<i64>, target: &Option<i64>) -> Result<Comparison> {
        let reference = self.reference();
        let prefix = target_prefix(self.second_reference());
        let conditions = conditions_of(self);
        Ok(match (self.which, factual, target) {
            (Extremum::Min, _, None) => Comparison::Pass,
            (Extremum::Min, None, Some(t)) => Comparison::check(*t == 0, || "Empty set.".to_string()),
            (Extremum::Min, Some(f), Some(t)) => Comparison::check(f >= t, || {
                format!("{reference} has min length {f} instead of {prefix}{t}. {conditions}")
            }),
            (Extremum::Max, None, _) => Comparison::Pass,
            (Extremum::Max, Some(f), None) => {
                Comparison::check(*f == 0, || "Reference value is None.".to_string())
            }
            (Extremum::Max, Some(f), Some(t)) => Comparison::check(f <= t, || {
                format!("{reference} has max length {f} instead of {prefix}{t}. {conditions}")
            }),
        })
    }
}
