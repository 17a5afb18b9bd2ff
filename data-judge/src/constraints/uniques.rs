//! Constraints over the distinct values of one or more columns.
//!
//! Single-column uniques ignore `NULL`. Multi-column selections yield one
//! [`Value::Tuple`] per distinct row.

use super::{fetch_count, target_prefix};
use crate::core::{
    apply_output_processors, conditions_of, finish, Comparison, Constraint, ConstraintBase,
    OutputProcessor, Retrieval, Retrieve, TestResult,
};
use crate::error::{JudgeError, Result};
use crate::formatters::format_values;
use crate::query;
use crate::sources::{count_of, Connection, DataReference, Value};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Applied to every retrieved unique value.
pub type MapFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Applied to the whole list of retrieved unique values, after any [`MapFn`].
pub type ReduceFn = Arc<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// Distinct values with their row counts.
///
/// Constant targets carry no counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniqueValues {
    pub values: Vec<Value>,
    pub counts: Vec<u64>,
}

impl UniqueValues {
    pub fn constant(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            counts: Vec::new(),
        }
    }

    fn set(&self) -> BTreeSet<Value> {
        self.values.iter().cloned().collect()
    }
}

/// Post-processing and tolerance options of the uniques family.
#[derive(Clone)]
pub struct UniquesOptions {
    pub map_func: Option<MapFn>,
    pub reduce_func: Option<ReduceFn>,
    /// Fraction of violations tolerated by subset and superset checks.
    pub max_relative_violations: f64,
    /// Applied to value lists shown in failure messages.
    pub output_processors: Vec<OutputProcessor>,
}

impl Default for UniquesOptions {
    fn default() -> Self {
        Self {
            map_func: None,
            reduce_func: None,
            max_relative_violations: 0.0,
            output_processors: vec![OutputProcessor::default()],
        }
    }
}

impl fmt::Debug for UniquesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniquesOptions")
            .field("map_func", &self.map_func.is_some())
            .field("reduce_func", &self.reduce_func.is_some())
            .field("max_relative_violations", &self.max_relative_violations)
            .field("output_processors", &self.output_processors)
            .finish()
    }
}

impl UniquesOptions {
    pub fn with_map_func(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.map_func = Some(Arc::new(f));
        self
    }

    pub fn with_reduce_func(
        mut self,
        f: impl Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.reduce_func = Some(Arc::new(f));
        self
    }

    pub fn with_max_relative_violations(mut self, fraction: f64) -> Self {
        self.max_relative_violations = fraction;
        self
    }

    pub fn with_output_processors(mut self, processors: Vec<OutputProcessor>) -> Self {
        self.output_processors = processors;
        self
    }
}

/// Set relation between the factual and the target uniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetRelation {
    Equality,
    /// Every factual value is a target value.
    Subset,
    /// Every target value is a factual value.
    Superset,
}

/// Compares the unique values of a reference with a constant set or a second reference.
///
/// # Examples
///
/// ```rust
/// use data_judge::constraints::uniques::{SetRelation, Uniques, UniquesOptions};
/// use data_judge::sources::{DataReference, DataSource};
///
/// let names = DataReference::new(DataSource::table("db", Some("public"), "companies"))
///     .with_columns(["name"])?;
/// let constraint = Uniques::within(
///     SetRelation::Superset,
///     names,
///     ["QuantCo", "Google"],
///     UniquesOptions::default(),
/// )?;
/// # Ok::<(), data_judge::error::JudgeError>(())
/// ```
#[derive(Debug)]
pub struct Uniques {
    relation: SetRelation,
    base: ConstraintBase<UniqueValues>,
    options: UniquesOptions,
}

impl Uniques {
    pub fn within(
        relation: SetRelation,
        reference: DataReference,
        uniques: impl IntoIterator<Item = impl Into<Value>>,
        options: UniquesOptions,
    ) -> Result<Self> {
        Self::new(
            relation,
            ConstraintBase::within(reference, UniqueValues::constant(uniques)),
            options,
        )
    }

    pub fn between(
        relation: SetRelation,
        reference: DataReference,
        second: DataReference,
        options: UniquesOptions,
    ) -> Result<Self> {
        Self::new(relation, ConstraintBase::between(reference, second), options)
    }

    fn new(
        relation: SetRelation,
        base: ConstraintBase<UniqueValues>,
        options: UniquesOptions,
    ) -> Result<Self> {
        if relation == SetRelation::Equality && options.max_relative_violations != 0.0 {
            return Err(JudgeError::configuration(
                "UniquesEquality does not support max_relative_violations",
            ));
        }
        if !(0.0..=1.0).contains(&options.max_relative_violations) {
            return Err(JudgeError::configuration(format!(
                "max_relative_violations must lie in [0, 1], got {}",
                options.max_relative_violations
            )));
        }
        Ok(Self {
            relation,
            base,
            options,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }

    pub async fn last_values(&self) -> Option<(UniqueValues, UniqueValues)> {
        self.base.last_values().await
    }

    fn render(&self, values: Vec<Value>, counts: Option<Vec<u64>>) -> Result<String> {
        let counts: Option<Vec<Value>> =
            counts.map(|c| c.into_iter().map(|n| Value::Int(n as i64)).collect());
        let (values, _) =
            apply_output_processors(&self.options.output_processors, &values, counts.as_deref())?;
        Ok(format_values(&values))
    }

    fn compare_equality(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Comparison> {
        let factual = factual.set();
        let target = target.set();
        let excess: Vec<Value> = factual.difference(&target).cloned().collect();
        let lacking: Vec<Value> = target.difference(&factual).cloned().collect();
        let reference = self.reference();
        let conditions = conditions_of(self);
        let message = match (excess.is_empty(), lacking.is_empty()) {
            (true, true) => return Ok(Comparison::Pass),
            (false, false) => format!(
                "{reference} doesn't have the element(s) '{}' and has the excess element(s) '{}' \
                 when compared with the reference values. {conditions}",
                self.render(lacking, None)?,
                self.render(excess, None)?
            ),
            (false, true) => format!(
                "{reference} has the excess element(s) '{}' when compared with the reference values. {conditions}",
                self.render(excess, None)?
            ),
            (true, false) => format!(
                "{reference} doesn't have the element(s) '{}' when compared with the reference values. {conditions}",
                self.render(lacking, None)?
            ),
        };
        Ok(Comparison::Fail(message))
    }

    fn compare_subset(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Comparison> {
        let target_set = target.set();
        let mut excess: BTreeMap<Value, u64> = BTreeMap::new();
        for (value, count) in factual.values.iter().zip(&factual.counts) {
            if !target_set.contains(value) {
                *excess.entry(value.clone()).or_default() += count;
            }
        }
        let n_rows: u64 = factual.counts.iter().sum();
        if n_rows == 0 {
            return Ok(Comparison::Pass);
        }
        let n_violations: u64 = excess.values().sum();
        let fraction = n_violations as f64 / n_rows as f64;
        let limit = self.options.max_relative_violations;
        if fraction <= limit {
            return Ok(Comparison::Pass);
        }
        let (values, counts): (Vec<Value>, Vec<u64>) = excess.into_iter().unzip();
        Ok(Comparison::Fail(format!(
            "{} has a fraction of {fraction} > {limit} values not being an element of '{}'. \
             It has e.g. excess elements '{}'. {}",
            self.reference(),
            format_values(&target_set.into_iter().collect::<Vec<_>>()),
            self.render(values, Some(counts))?,
            conditions_of(self)
        )))
    }

    fn compare_superset(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Comparison> {
        let factual_set = factual.set();
        let target_set = target.set();
        if factual_set.is_empty() || target_set.is_empty() {
            return Ok(Comparison::Pass);
        }
        let lacking: Vec<Value> = target_set.difference(&factual_set).cloned().collect();
        let fraction = lacking.len() as f64 / target_set.len() as f64;
        let limit = self.options.max_relative_violations;
        if fraction <= limit {
            return Ok(Comparison::Pass);
        }
        Ok(Comparison::Fail(format!(
            "{} has a fraction of {fraction} > {limit} lacking unique values of '{}'. \
             E.g. it doesn't have the unique value(s) '{}'. {}",
            self.reference(),
            format_values(&target_set.into_iter().collect::<Vec<_>>()),
            self.render(lacking, None)?,
            conditions_of(self)
        )))
    }
}

#[async_trait]
impl Constraint for Uniques {
    fn kind(&self) -> &'static str {
        match self.relation {
            SetRelation::Equality => "UniquesEquality",
            SetRelation::Subset => "UniquesSubset",
            SetRelation::Superset => "UniquesSuperset",
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
impl Retrieve for Uniques {
    type Value = UniqueValues;

    fn base(&self) -> &ConstraintBase<UniqueValues> {
        &self.base
    }

    #[instrument(skip(self, conn, reference), fields(constraint.kind = self.kind()))]
    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<UniqueValues>> {
        let (uniques, sql) = retrieve_uniques(conn, reference, true).await?;
        let mut values: Vec<Value> = uniques.keys().cloned().collect();
        let mut counts: Vec<u64> = uniques.values().copied().collect();
        if let Some(map) = &self.options.map_func {
            values = values.iter().map(|v| map(v)).collect();
        }
        if let Some(reduce) = &self.options.reduce_func {
            values = reduce(values);
            if values.len() != counts.len() {
                debug!(
                    n_values = values.len(),
                    n_counts = counts.len(),
                    "reduce_func changed the number of uniques; counting each value once"
                );
                counts = vec![1; values.len()];
            }
        }
        Ok(Retrieval::new(UniqueValues { values, counts }, vec![sql]))
    }

    fn compare(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Comparison> {
        match self.relation {
            SetRelation::Equality => self.compare_equality(factual, target),
            SetRelation::Subset => self.compare_subset(factual, target),
            SetRelation::Superset => self.compare_superset(factual, target),
        }
    }
}

/// Distinct values of the reference's columns with their counts, sorted by value.
///
/// With `drop_null` a single-column `NULL` is left out.
pub(crate) async fn retrieve_uniques(
    conn: &dyn Connection,
    reference: &DataReference,
    drop_null: bool,
) -> Result<(BTreeMap<Value, u64>, String)> {
    let resolved = reference.resolve(conn).await?;
    let sql = query::uniques(&resolved)?;
    let rows = conn.query(&sql).await?;
    let width = resolved.columns().len();
    let mut uniques = BTreeMap::new();
    for mut row in rows.rows {
        let count = row.pop().map(|c| count_of(&c)).transpose()?.unwrap_or(0);
        row.truncate(width);
        let value = Value::from_row(row);
        if drop_null && value.is_null() {
            continue;
        }
        *uniques.entry(value).or_insert(0) += count;
    }
    Ok((uniques, sql))
}

/// Number of distinct rows of the reference's columns.
#[derive(Debug)]
pub struct NUniquesEquality {
    base: ConstraintBase<u64>,
}

impl NUniquesEquality {
    pub fn within(reference: DataReference, n_uniques: u64) -> Self {
        Self {
            base: ConstraintBase::within(reference, n_uniques),
        }
    }

    pub fn between(reference: DataReference, second: DataReference) -> Self {
        Self {
            base: ConstraintBase::between(reference, second),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }
}

#[async_trait]
impl Constraint for NUniquesEquality {
    fn kind(&self) -> &'static str {
        "NUniquesEquality"
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
impl Retrieve for NUniquesEquality {
    type Value = u64;

    fn base(&self) -> &ConstraintBase<u64> {
        &self.base
    }

    async fn retrieve(&self, conn: &dyn Connection, reference: &DataReference) -> Result<Retrieval<u64>> {
        let resolved = reference.resolve(conn).await?;
        let sql = query::distinct_row_count(&resolved);
        let n = fetch_count(conn, &sql).await?;
        Ok(Retrieval::new(n, vec![sql]))
    }

    fn compare(&self, factual: &u64, target: &u64) -> Result<Comparison> {
        Ok(Comparison::check(factual == target, || {
            format!(
                "{} has {factual} unique(s) instead of {}{target}. {}",
                self.reference(),
                target_prefix(self.second_reference()),
                conditions_of(self)
            )
        }))
    }
}

/// Bounds the share of every category of a column.
///
/// Categories missing from `distribution` fall back to `default_bounds`. The
/// summed amount by which categories exceed their bounds, relative to the row
/// count, must not exceed `max_relative_violations`.
#[derive(Debug)]
pub struct CategoricalBound {
    reference: DataReference,
    distribution: HashMap<Value, (f64, f64)>,
    default_bounds: (f64, f64),
    max_relative_violations: f64,
    name: Option<String>,
}

impl CategoricalBound {
    pub fn new(
        reference: DataReference,
        distribution: HashMap<Value, (f64, f64)>,
        default_bounds: (f64, f64),
        max_relative_violations: f64,
    ) -> Result<Self> {
        for (lo, hi) in distribution.values().chain(std::iter::once(&default_bounds)) {
            if !(0.0..=1.0).contains(lo) || !(0.0..=1.0).contains(hi) || lo > hi {
                return Err(JudgeError::configuration(format!(
                    "Category bounds must satisfy 0 <= min <= max <= 1, got ({lo}, {hi})"
                )));
            }
        }
        Ok(Self {
            reference,
            distribution,
            default_bounds,
            max_relative_violations,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn bounds(&self, value: &Value) -> (f64, f64) {
        self.distribution
            .get(value)
            .copied()
            .unwrap_or(self.default_bounds)
    }

    /// Applies the bounds to retrieved category counts.
    pub fn judge(&self, factual: &BTreeMap<Value, u64>) -> Comparison {
        let total: u64 = factual.values().sum();
        if total == 0 {
            return Comparison::Pass;
        }
        let total_f = total as f64;
        let variants: BTreeSet<&Value> = factual.keys().chain(self.distribution.keys()).collect();

        let mut violating = Vec::new();
        let mut violations = 0.0;
        for variant in variants {
            let count = factual.get(variant).copied().unwrap_or(0) as f64;
            let (lo, hi) = self.bounds(variant);
            let (min_count, max_count) = (lo * total_f, hi * total_f);
            let excess = (count - max_count).max(0.0) + (min_count - count).max(0.0);
            if excess > 0.0 {
                violations += excess;
                violating.push((variant, count, lo, hi, min_count, max_count));
            }
        }
        let fraction = violations / total_f;
        if fraction <= self.max_relative_violations {
            return Comparison::Pass;
        }

        let mut message = format!(
            "{} has {}% > {}% of element(s) violating the bound constraints:\n",
            self.reference,
            fraction * 100.0,
            self.max_relative_violations * 100.0
        );
        for (variant, count, lo, hi, min_count, max_count) in violating {
            message.push_str(&format!(
                "{} with a share of {}% ({count} out of {total}) while a share between \
                 {}% ({}) and {}% ({}) is required\n",
                variant.repr(),
                count * 100.0 / total_f,
                lo * 100.0,
                min_count.ceil(),
                hi * 100.0,
                max_count.floor()
            ));
        }
        message.push_str(&conditions_of(self));
        Comparison::Fail(message)
    }
}

#[async_trait]
impl Constraint for CategoricalBound {
    fn kind(&self) -> &'static str {
        "CategoricalBound"
    }

    fn reference(&self) -> &DataReference {
        &self.reference
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        let (uniques, sql) = retrieve_uniques(conn, &self.reference, false).await?;
        debug!(n_categories = uniques.len(), "Categories retrieved");
        let comparison = self.judge(&uniques);
        Ok(finish(
            self.kind(),
            self.description(),
            comparison,
            vec![sql],
            Vec::new(),
        ))
    }
}
