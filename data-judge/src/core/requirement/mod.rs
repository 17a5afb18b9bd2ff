//! Ordered constraint collections over fixed data sources.
//!
//! A [`WithinRequirement`] binds every constraint to one source, a
//! [`BetweenRequirement`] to an ordered pair. Requirements are grown with
//! `add_*_constraint` calls and evaluated one constraint after another on a
//! single connection.

mod between;
mod within;

pub use between::{BetweenRequirement, Conditions};
pub use within::WithinRequirement;

pub use crate::constraints::uniques::UniquesOptions;
pub use crate::constraints::varchar::RegexOptions;

use crate::config::EvaluationConfig;
use crate::core::{Constraint, TestResult};
use crate::error::{JudgeError, Result};
use crate::logging::truncate_field;
use crate::sources::{Condition, Connection};
use async_trait::async_trait;
use tracing::{debug, error, info, instrument, trace, warn, Level};

/// Options shared by the interval no-overlap and no-gap constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalOptions {
    /// Columns identifying an entity. Empty means the interval columns only.
    pub key_columns: Vec<String>,
    /// Whether interval ends are part of the interval.
    pub end_included: bool,
    /// Fraction of keys allowed to violate the property.
    pub max_relative_n_violations: f64,
    pub condition: Option<Condition>,
    pub name: Option<String>,
}

impl Default for IntervalOptions {
    fn default() -> Self {
        Self {
            key_columns: Vec::new(),
            end_included: true,
            max_relative_n_violations: 0.0,
            condition: None,
            name: None,
        }
    }
}

impl IntervalOptions {
    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_end_included(mut self, end_included: bool) -> Self {
        self.end_included = end_included;
        self
    }

    pub fn with_max_relative_n_violations(mut self, fraction: f64) -> Self {
        self.max_relative_n_violations = fraction;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Key columns followed by the interval columns.
    pub(crate) fn relevant_columns(&self, interval_columns: &[&str]) -> Vec<String> {
        let mut columns: Vec<String> = interval_columns.iter().map(|c| c.to_string()).collect();
        columns.extend(self.key_columns.iter().cloned());
        columns
    }
}

/// Applies an optional caller-supplied name.
pub(crate) trait Named: Sized {
    fn named(self, name: Option<&str>) -> Self;
}

macro_rules! impl_named {
    ($($constraint:ty),* $(,)?) => {
        $(
            impl Named for $constraint {
                fn named(self, name: Option<&str>) -> Self {
                    match name {
                        Some(name) => self.with_name(name),
                        None => self,
                    }
                }
            }
        )*
    };
}

impl_named!(
    crate::constraints::AggregateNumericRangeEquality,
    crate::constraints::ColumnSet,
    crate::constraints::ColumnType,
    crate::constraints::DateBetween,
    crate::constraints::DateExtremum,
    crate::constraints::FunctionalDependency,
    crate::constraints::KolmogorovSmirnov2Sample,
    crate::constraints::MaxNullFraction,
    crate::constraints::NoGap,
    crate::constraints::NoOverlap,
    crate::constraints::NRows,
    crate::constraints::NUniquesEquality,
    crate::constraints::NumericBetween,
    crate::constraints::NumericExtremum,
    crate::constraints::NumericMean,
    crate::constraints::NumericPercentile,
    crate::constraints::PrimaryKeyDefinition,
    crate::constraints::RelativeChange,
    crate::constraints::RowMatchingEquality,
    crate::constraints::RowSetComparison,
    crate::constraints::CategoricalBound,
    crate::constraints::Uniqueness,
    crate::constraints::Uniques,
    crate::constraints::VarCharLength,
    crate::constraints::VarCharRegex,
    crate::constraints::VarCharRegexDb,
);

/// Common behaviour of [`WithinRequirement`] and [`BetweenRequirement`].
#[async_trait]
pub trait Requirement: Send + Sync {
    fn constraints(&self) -> &[Box<dyn Constraint>];

    fn constraints_mut(&mut self) -> &mut Vec<Box<dyn Constraint>>;

    /// Settings used for add-time defaults and by [`Requirement::test`].
    fn config(&self) -> &EvaluationConfig;

    fn len(&self) -> usize {
        self.constraints().len()
    }

    fn is_empty(&self) -> bool {
        self.constraints().is_empty()
    }

    fn get(&self, index: usize) -> Option<&dyn Constraint> {
        self.constraints().get(index).map(|c| c.as_ref())
    }

    /// Appends a constraint built outside the `add_*` helpers.
    fn push(&mut self, constraint: Box<dyn Constraint>) {
        self.constraints_mut().push(constraint);
    }

    fn insert(&mut self, index: usize, constraint: Box<dyn Constraint>) -> Result<()> {
        let len = self.len();
        if index > len {
            return Err(JudgeError::configuration(format!(
                "Cannot insert at position {index} of a requirement with {len} constraints"
            )));
        }
        self.constraints_mut().insert(index, constraint);
        Ok(())
    }

    fn remove(&mut self, index: usize) -> Option<Box<dyn Constraint>> {
        (index < self.len()).then(|| self.constraints_mut().remove(index))
    }

    /// Stable identifiers of the constraints, in order.
    fn descriptions(&self) -> Vec<String> {
        self.constraints().iter().map(|c| c.description()).collect()
    }

    /// Evaluates every constraint with the requirement's own settings.
    async fn test(&self, conn: &dyn Connection) -> Vec<Result<TestResult>> {
        run_constraints(self.constraints(), conn, self.config()).await
    }

    /// Evaluates every constraint, logging through `config`.
    async fn test_with(
        &self,
        conn: &dyn Connection,
        config: &EvaluationConfig,
    ) -> Vec<Result<TestResult>> {
        run_constraints(self.constraints(), conn, config).await
    }
}

/// Runs the constraints in order. One constraint's error does not stop the others.
#[instrument(skip_all, fields(requirement.constraints = constraints.len()))]
pub(crate) async fn run_constraints(
    constraints: &[Box<dyn Constraint>],
    conn: &dyn Connection,
    config: &EvaluationConfig,
) -> Vec<Result<TestResult>> {
    let formatter = config.formatter();
    let (mut passed, mut failed, mut errors) = (0usize, 0usize, 0usize);
    let mut results = Vec::with_capacity(constraints.len());

    for constraint in constraints {
        let description = constraint.description();
        crate::log_constraint!(
            config.log,
            constraint.kind = constraint.kind(),
            constraint.description = %description,
            "Evaluating constraint"
        );
        let outcome = constraint.test(conn).await;
        if let Ok(result) = &outcome {
            for sql in result.factual_queries().iter().chain(result.target_queries()) {
                crate::log_query!(config.log, sql);
            }
        }
        match &outcome {
            Ok(result) if result.outcome => passed += 1,
            Ok(result) => {
                failed += 1;
                if config.log.log_failures {
                    let message = result.formatted_logging_message(formatter.as_ref());
                    warn!(
                        constraint.description = %description,
                        message = %truncate_field(&message, config.log.max_field_length),
                        "Constraint failed"
                    );
                }
            }
            Err(e) => {
                errors += 1;
                error!(
                    constraint.description = %description,
                    error.kind = ?e.kind(),
                    error = %e,
                    "Constraint could not be evaluated"
                );
            }
        }
        results.push(outcome);
    }

    log_summary(config.log.base_level, passed, failed, errors);
    results
}

fn log_summary(level: Level, passed: usize, failed: usize, errors: usize) {
    if level == Level::ERROR {
        error!(passed, failed, errors, "Requirement evaluated");
    } else if level == Level::WARN {
        warn!(passed, failed, errors, "Requirement evaluated");
    } else if level == Level::INFO {
        info!(passed, failed, errors, "Requirement evaluated");
    } else if level == Level::DEBUG {
        debug!(passed, failed, errors, "Requirement evaluated");
    } else {
        trace!(passed, failed, errors, "Requirement evaluated");
    }
}
