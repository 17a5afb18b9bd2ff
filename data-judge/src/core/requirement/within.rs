use super::{IntervalOptions, Named, RegexOptions, Requirement, UniquesOptions};
use crate::config::EvaluationConfig;
use crate::constraints::{
    AggregateNumericRangeEquality, CategoricalBound, ColumnSet, ColumnType, DateBetween,
    DateColumnType, DateExtremum, Extremum, FunctionalDependency, IntervalKind, MaxNullFraction,
    NRows, NUniquesEquality, NoGap, NoOverlap, NumericBetween, NumericExtremum, NumericMean,
    NumericPercentile, PrimaryKeyDefinition, RowCountCheck, SetRelation, TypeTarget, Uniqueness,
    UniquenessTolerance, Uniques, VarCharLength, VarCharRegex, VarCharRegexDb,
};
use crate::core::Constraint;
use crate::error::Result;
use crate::sources::{Condition, DataReference, DataSource, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Constraints over a single data source.
///
/// # Examples
///
/// ```rust
/// use data_judge::core::{Requirement, WithinRequirement};
///
/// let mut requirement = WithinRequirement::from_table("db", Some("public"), "companies");
/// requirement.add_n_rows_min_constraint(3, None, None).unwrap();
/// requirement.add_column_existence_constraint(["id", "name"], None);
/// assert_eq!(
///     requirement.descriptions(),
///     vec![
///         "NRowsMin::db.public.companies".to_string(),
///         "ColumnExistence::db.public.companies".to_string(),
///     ]
/// );
/// ```
#[derive(Debug)]
pub struct WithinRequirement {
    source: Arc<DataSource>,
    constraints: Vec<Box<dyn Constraint>>,
    config: EvaluationConfig,
}

impl WithinRequirement {
    pub fn new(source: DataSource) -> Self {
        Self {
            source: Arc::new(source),
            constraints: Vec::new(),
            config: EvaluationConfig::default(),
        }
    }

    pub fn from_table(db: &str, schema: Option<&str>, table: &str) -> Self {
        Self::new(DataSource::table(db, schema, table))
    }

    /// Source over literal SQL. `name` stands for the query in messages.
    pub fn from_raw_query(name: &str, query: &str, columns: Option<Vec<String>>) -> Result<Self> {
        Ok(Self::new(DataSource::raw_query(name, query, columns)?))
    }

    /// Source over a parsed query expression.
    pub fn from_expression(name: &str, sql: &str) -> Result<Self> {
        Ok(Self::new(DataSource::expression(name, sql)?))
    }

    /// Replaces the settings used for defaults and evaluation.
    pub fn with_config(mut self, config: EvaluationConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    fn reference<S: AsRef<str>>(
        &self,
        columns: Option<&[S]>,
        condition: Option<Condition>,
    ) -> Result<DataReference> {
        let reference = DataReference::new(Arc::clone(&self.source)).with_condition(condition);
        match columns {
            Some(columns) => reference.with_columns(columns.iter().map(|c| c.as_ref().to_string())),
            None => Ok(reference),
        }
    }

    fn column_reference(&self, column: &str, condition: Option<Condition>) -> Result<DataReference> {
        self.reference(Some(&[column][..]), condition)
    }

    fn add(&mut self, constraint: impl Constraint + 'static) {
        self.constraints.push(Box::new(constraint));
    }

    fn regex_options(&self, options: Option<RegexOptions>) -> RegexOptions {
        options.unwrap_or_else(|| {
            RegexOptions::default().with_n_counterexamples(self.config.n_counterexamples)
        })
    }

    fn uniques_options(&self, options: Option<UniquesOptions>) -> UniquesOptions {
        options.unwrap_or_else(|| {
            UniquesOptions::default().with_output_processors(self.config.output_processors())
        })
    }

    pub fn add_column_existence_constraint<I, S>(&mut self, columns: I, name: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reference = DataReference::new(Arc::clone(&self.source));
        self.add(ColumnSet::existence(reference, columns).named(name));
    }

    /// The declared primary key must be exactly `primary_keys`.
    pub fn add_primary_key_definition_constraint(
        &mut self,
        primary_keys: Vec<String>,
        name: Option<&str>,
    ) {
        let reference = DataReference::new(Arc::clone(&self.source));
        self.add(PrimaryKeyDefinition::new(reference, primary_keys).named(name));
    }

    /// Tuples of `columns` (all columns when `None`) identify rows.
    ///
    /// At most one of the two tolerances may be non-zero. With `infer_pk_columns`
    /// the declared primary key replaces `columns`.
    pub fn add_uniqueness_constraint(
        &mut self,
        columns: Option<Vec<String>>,
        max_duplicate_fraction: Option<f64>,
        max_absolute_n_duplicates: Option<u64>,
        infer_pk_columns: bool,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let tolerance = UniquenessTolerance::new(max_duplicate_fraction, max_absolute_n_duplicates)?;
        let reference = self.reference(columns.as_deref(), condition)?;
        self.add(Uniqueness::new(reference, tolerance, infer_pk_columns).named(name));
        Ok(())
    }

    pub fn add_column_type_constraint(
        &mut self,
        column: &str,
        column_type: TypeTarget,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, None)?;
        self.add(ColumnType::within(reference, column_type).named(name));
        Ok(())
    }

    pub fn add_null_absence_constraint(
        &mut self,
        column: &str,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_max_null_fraction_constraint(column, 0.0, condition, name)
    }

    pub fn add_max_null_fraction_constraint(
        &mut self,
        column: &str,
        max_null_fraction: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        self.add(MaxNullFraction::within(reference, max_null_fraction)?.named(name));
        Ok(())
    }

    fn add_n_rows(
        &mut self,
        check: RowCountCheck,
        n_rows: u64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.reference::<&str>(None, condition)?;
        self.add(NRows::within(check, reference, n_rows).named(name));
        Ok(())
    }

    pub fn add_n_rows_equality_constraint(
        &mut self,
        n_rows: u64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_n_rows(RowCountCheck::Equality, n_rows, condition, name)
    }

    pub fn add_n_rows_min_constraint(
        &mut self,
        n_rows_min: u64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_n_rows(RowCountCheck::Min, n_rows_min, condition, name)
    }

    pub fn add_n_rows_max_constraint(
        &mut self,
        n_rows_max: u64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_n_rows(RowCountCheck::Max, n_rows_max, condition, name)
    }

    fn add_uniques<V: Into<Value>>(
        &mut self,
        relation: SetRelation,
        columns: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: Option<UniquesOptions>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.reference(Some(columns), condition)?;
        let options = self.uniques_options(options);
        self.add(Uniques::within(relation, reference, uniques, options)?.named(name));
        Ok(())
    }

    /// The distinct values of `columns` are exactly `uniques`.
    ///
    /// Multi-column uniques are given as [`Value::Tuple`]s.
    pub fn add_uniques_equality_constraint<V: Into<Value>>(
        &mut self,
        columns: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: Option<UniquesOptions>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_uniques(SetRelation::Equality, columns, uniques, options, condition, name)
    }

    /// Every value of `uniques` occurs in `columns`.
    pub fn add_uniques_superset_constraint<V: Into<Value>>(
        &mut self,
        columns: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: Option<UniquesOptions>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_uniques(SetRelation::Superset, columns, uniques, options, condition, name)
    }

    /// Every value of `columns` is one of `uniques`.
    pub fn add_uniques_subset_constraint<V: Into<Value>>(
        &mut self,
        columns: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: Option<UniquesOptions>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_uniques(SetRelation::Subset, columns, uniques, options, condition, name)
    }

    pub fn add_n_uniques_equality_constraint(
        &mut self,
        columns: &[&str],
        n_uniques: u64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.reference(Some(columns), condition)?;
        self.add(NUniquesEquality::within(reference, n_uniques).named(name));
        Ok(())
    }

    /// Share of each value must lie within its bounds; unlisted values use `default_bounds`.
    pub fn add_categorical_bound_constraint(
        &mut self,
        columns: &[&str],
        distribution: HashMap<Value, (f64, f64)>,
        default_bounds: (f64, f64),
        max_relative_violations: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.reference(Some(columns), condition)?;
        let bound =
            CategoricalBound::new(reference, distribution, default_bounds, max_relative_violations)?;
        self.add(bound.named(name));
        Ok(())
    }

    pub fn add_numeric_min_constraint(
        &mut self,
        column: &str,
        min_value: impl Into<Value>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        self.add(NumericExtremum::within(Extremum::Min, reference, min_value).named(name));
        Ok(())
    }

    pub fn add_numeric_max_constraint(
        &mut self,
        column: &str,
        max_value: impl Into<Value>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        self.add(NumericExtremum::within(Extremum::Max, reference, max_value).named(name));
        Ok(())
    }

    /// At least `min_fraction` of all rows lie within `[lower_bound, upper_bound]`.
    pub fn add_numeric_between_constraint(
        &mut self,
        column: &str,
        lower_bound: f64,
        upper_bound: f64,
        min_fraction: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let between = NumericBetween::new(reference, lower_bound, upper_bound, min_fraction)?;
        self.add(between.named(name));
        Ok(())
    }

    pub fn add_numeric_mean_constraint(
        &mut self,
        column: &str,
        mean_value: f64,
        max_absolute_deviation: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        self.add(NumericMean::within(reference, mean_value, max_absolute_deviation)?.named(name));
        Ok(())
    }

    /// The `percentage`-th nearest-rank percentile is close to `expected_percentile`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_numeric_percentile_constraint(
        &mut self,
        column: &str,
        percentage: f64,
        expected_percentile: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let percentile = NumericPercentile::within(
            reference,
            percentage,
            expected_percentile,
            max_absolute_deviation,
            max_relative_deviation,
        )?;
        self.add(percentile.named(name));
        Ok(())
    }

    /// With `use_lower_bound_reference` the minimum must not be earlier than
    /// `min_value`; otherwise it must not be later.
    pub fn add_date_min_constraint(
        &mut self,
        column: &str,
        min_value: &str,
        use_lower_bound_reference: bool,
        column_type: DateColumnType,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let min = DateExtremum::within(
            Extremum::Min,
            reference,
            min_value,
            use_lower_bound_reference,
            column_type,
        )?;
        self.add(min.named(name));
        Ok(())
    }

    /// With `use_upper_bound_reference` the maximum must not be later than
    /// `max_value`; otherwise it must not be earlier.
    pub fn add_date_max_constraint(
        &mut self,
        column: &str,
        max_value: &str,
        use_upper_bound_reference: bool,
        column_type: DateColumnType,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let max = DateExtremum::within(
            Extremum::Max,
            reference,
            max_value,
            use_upper_bound_reference,
            column_type,
        )?;
        self.add(max.named(name));
        Ok(())
    }

    pub fn add_date_between_constraint(
        &mut self,
        column: &str,
        lower_bound: &str,
        upper_bound: &str,
        min_fraction: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let between = DateBetween::new(reference, lower_bound, upper_bound, min_fraction)?;
        self.add(between.named(name));
        Ok(())
    }

    fn interval_reference(&self, options: &IntervalOptions, columns: &[&str]) -> Result<DataReference> {
        let relevant = options.relevant_columns(columns);
        self.reference(Some(relevant.as_slice()), options.condition.clone())
    }

    /// Date ranges of the same key must not overlap.
    pub fn add_date_no_overlap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
    ) -> Result<()> {
        let reference = self.interval_reference(&options, &[start_column, end_column])?;
        let check = NoOverlap::new(
            IntervalKind::Date,
            reference,
            options.key_columns.clone(),
            vec![start_column.to_string()],
            vec![end_column.to_string()],
            options.end_included,
            options.max_relative_n_violations,
        )?;
        self.add(check.named(options.name.as_deref()));
        Ok(())
    }

    /// Rectangles spanned by two date ranges of the same key must not overlap.
    pub fn add_date_no_overlap_2d_constraint(
        &mut self,
        start_column1: &str,
        end_column1: &str,
        start_column2: &str,
        end_column2: &str,
        options: IntervalOptions,
    ) -> Result<()> {
        let reference = self.interval_reference(
            &options,
            &[start_column1, end_column1, start_column2, end_column2],
        )?;
        let check = NoOverlap::new(
            IntervalKind::Date,
            reference,
            options.key_columns.clone(),
            vec![start_column1.to_string(), start_column2.to_string()],
            vec![end_column1.to_string(), end_column2.to_string()],
            options.end_included,
            options.max_relative_n_violations,
        )?;
        self.add(check.named(options.name.as_deref()));
        Ok(())
    }

    /// Consecutive date ranges of the same key must touch.
    pub fn add_date_no_gap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
    ) -> Result<()> {
        let reference = self.interval_reference(&options, &[start_column, end_column])?;
        let check = NoGap::date(
            reference,
            options.key_columns.clone(),
            start_column,
            end_column,
            options.end_included,
            options.max_relative_n_violations,
        )?;
        self.add(check.named(options.name.as_deref()));
        Ok(())
    }

    /// Consecutive numeric ranges of the same key may be at most
    /// `legitimate_gap_size` apart.
    pub fn add_numeric_no_gap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        legitimate_gap_size: f64,
        options: IntervalOptions,
    ) -> Result<()> {
        let reference = self.interval_reference(&options, &[start_column, end_column])?;
        let check = NoGap::numeric(
            reference,
            options.key_columns.clone(),
            start_column,
            end_column,
            legitimate_gap_size,
            options.max_relative_n_violations,
        )?;
        self.add(check.named(options.name.as_deref()));
        Ok(())
    }

    pub fn add_numeric_no_overlap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
    ) -> Result<()> {
        let reference = self.interval_reference(&options, &[start_column, end_column])?;
        let check = NoOverlap::new(
            IntervalKind::Numeric,
            reference,
            options.key_columns.clone(),
            vec![start_column.to_string()],
            vec![end_column.to_string()],
            options.end_included,
            options.max_relative_n_violations,
        )?;
        self.add(check.named(options.name.as_deref()));
        Ok(())
    }

    /// `key_columns` determine `value_columns`: each key maps to one value tuple.
    pub fn add_functional_dependency_constraint(
        &mut self,
        key_columns: &[&str],
        value_columns: &[&str],
        max_relative_violations: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let relevant: Vec<&str> = key_columns.iter().chain(value_columns).copied().collect();
        let reference = self.reference(Some(relevant.as_slice()), condition)?;
        let keys = key_columns.iter().map(|k| k.to_string()).collect();
        let dependency = FunctionalDependency::new(reference, keys)?
            .with_max_relative_violations(max_relative_violations)?
            .with_output_processors(self.config.output_processors());
        self.add(dependency.named(name));
        Ok(())
    }

    /// Values must match `regex` from their start; checked client side over the uniques.
    pub fn add_varchar_regex_constraint(
        &mut self,
        column: &str,
        regex: &str,
        options: Option<RegexOptions>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let options = self.regex_options(options);
        self.add(VarCharRegex::new(reference, regex, options)?.named(name));
        Ok(())
    }

    /// Like [`add_varchar_regex_constraint`](Self::add_varchar_regex_constraint), counted in the database.
    pub fn add_varchar_regex_constraint_db(
        &mut self,
        column: &str,
        regex: &str,
        options: Option<RegexOptions>,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        let options = self.regex_options(options);
        self.add(VarCharRegexDb::new(reference, regex, options)?.named(name));
        Ok(())
    }

    pub fn add_varchar_min_length_constraint(
        &mut self,
        column: &str,
        min_length: i64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        self.add(VarCharLength::within(Extremum::Min, reference, min_length).named(name));
        Ok(())
    }

    pub fn add_varchar_max_length_constraint(
        &mut self,
        column: &str,
        max_length: i64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.column_reference(column, condition)?;
        self.add(VarCharLength::within(Extremum::Max, reference, max_length).named(name));
        Ok(())
    }

    /// Per group of `columns`, `aggregation_column` covers `start_value..=max` without holes.
    pub fn add_groupby_aggregation_constraint(
        &mut self,
        columns: &[&str],
        aggregation_column: &str,
        start_value: i64,
        tolerance: f64,
        condition: Option<Condition>,
        name: Option<&str>,
    ) -> Result<()> {
        let reference = self.reference(Some(columns), condition)?;
        let check =
            AggregateNumericRangeEquality::new(reference, aggregation_column, start_value, tolerance)?;
        self.add(check.named(name));
        Ok(())
    }
}

impl Requirement for WithinRequirement {
    fn constraints(&self) -> &[Box<dyn Constraint>] {
        &self.constraints
    }

    fn constraints_mut(&mut self) -> &mut Vec<Box<dyn Constraint>> {
        &mut self.constraints
    }

    fn config(&self) -> &EvaluationConfig {
        &self.config
    }
}
