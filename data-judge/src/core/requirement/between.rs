use super::{Named, Requirement, UniquesOptions};
use crate::config::EvaluationConfig;
use crate::constraints::{
    ChangeBound, ColumnCheck, ColumnSet, ColumnType, DateColumnType, DateExtremum, Extremum,
    KolmogorovSmirnov2Sample, KsComputation, MaxNullFraction, Measure, NRows, NUniquesEquality,
    NumericExtremum, NumericMean, NumericPercentile, RelativeChange, RowCountCheck,
    RowMatchingEquality, RowSetCheck, RowSetComparison, SetRelation, Uniques, VarCharLength,
};
use crate::core::{Constraint, Tolerance};
use crate::error::Result;
use crate::sources::{Condition, DataReference, DataSource};
use std::sync::Arc;

/// Optional conditions on the two sides of a Between constraint.
pub type Conditions = (Option<Condition>, Option<Condition>);

/// Constraints comparing an ordered pair of data sources.
///
/// The first source holds the factual values, the second the target values.
/// Date columns, when set, enable date-range derived growth tolerances.
///
/// # Examples
///
/// ```rust
/// use data_judge::core::{BetweenRequirement, Requirement};
///
/// let mut requirement = BetweenRequirement::from_tables(
///     ("db", Some("public"), "companies"),
///     ("db", Some("public"), "companies_archive"),
/// );
/// requirement
///     .add_n_rows_max_loss_constraint(Some(0.1), None, (None, None), None)
///     .unwrap();
/// assert_eq!(
///     requirement.descriptions(),
///     vec!["NRowsMaxLoss::companies | companies_archive".to_string()]
/// );
/// ```
#[derive(Debug)]
pub struct BetweenRequirement {
    source: Arc<DataSource>,
    source2: Arc<DataSource>,
    date_columns: Option<(String, String)>,
    constraints: Vec<Box<dyn Constraint>>,
    config: EvaluationConfig,
}

impl BetweenRequirement {
    pub fn new(source: DataSource, source2: DataSource) -> Self {
        Self {
            source: Arc::new(source),
            source2: Arc::new(source2),
            date_columns: None,
            constraints: Vec::new(),
            config: EvaluationConfig::default(),
        }
    }

    /// Two tables, each given as `(db, schema, table)`.
    pub fn from_tables(
        first: (&str, Option<&str>, &str),
        second: (&str, Option<&str>, &str),
    ) -> Self {
        Self::new(
            DataSource::table(first.0, first.1, first.2),
            DataSource::table(second.0, second.1, second.2),
        )
    }

    /// Two raw queries, each given as `(name, query, declared columns)`.
    pub fn from_raw_queries(
        first: (&str, &str, Option<Vec<String>>),
        second: (&str, &str, Option<Vec<String>>),
    ) -> Result<Self> {
        Ok(Self::new(
            DataSource::raw_query(first.0, first.1, first.2)?,
            DataSource::raw_query(second.0, second.1, second.2)?,
        ))
    }

    /// Two parsed query expressions, each given as `(name, sql)`.
    pub fn from_expressions(first: (&str, &str), second: (&str, &str)) -> Result<Self> {
        Ok(Self::new(
            DataSource::expression(first.0, first.1)?,
            DataSource::expression(second.0, second.1)?,
        ))
    }

    /// Date columns of the first and the second source, used by date-range tolerances.
    pub fn with_date_columns(mut self, date_column: &str, date_column2: &str) -> Self {
        self.date_columns = Some((date_column.to_string(), date_column2.to_string()));
        self
    }

    /// Replaces the settings used for defaults and evaluation.
    pub fn with_config(mut self, config: EvaluationConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    fn references<S: AsRef<str>>(
        &self,
        columns: (Option<&[S]>, Option<&[S]>),
        conditions: Conditions,
    ) -> Result<(DataReference, DataReference)> {
        let build = |source: &Arc<DataSource>, columns: Option<&[S]>, condition| {
            let reference = DataReference::new(Arc::clone(source)).with_condition(condition);
            match columns {
                Some(columns) => {
                    reference.with_columns(columns.iter().map(|c| c.as_ref().to_string()))
                }
                None => Ok(reference),
            }
        };
        Ok((
            build(&self.source, columns.0, conditions.0)?,
            build(&self.source2, columns.1, conditions.1)?,
        ))
    }

    fn column_references(
        &self,
        column1: &str,
        column2: &str,
        conditions: Conditions,
    ) -> Result<(DataReference, DataReference)> {
        self.references((Some(&[column1][..]), Some(&[column2][..])), conditions)
    }

    fn table_references(&self, conditions: Conditions) -> Result<(DataReference, DataReference)> {
        self.references::<&str>((None, None), conditions)
    }

    fn tolerance(&self, constant: Option<f64>, date_range_deviation: Option<f64>) -> Result<Tolerance> {
        let date_columns = self
            .date_columns
            .as_ref()
            .map(|(first, second)| (first.as_str(), second.as_str()));
        Tolerance::new(constant, date_range_deviation, date_columns)
    }

    fn add(&mut self, constraint: impl Constraint + 'static) {
        self.constraints.push(Box::new(constraint));
    }

    pub fn add_n_rows_equality_constraint(
        &mut self,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.table_references(conditions)?;
        self.add(NRows::between(RowCountCheck::Equality, first, second).named(name));
        Ok(())
    }

    /// The first source has at least as many rows as the second.
    pub fn add_n_rows_min_constraint(
        &mut self,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.table_references(conditions)?;
        self.add(NRows::between(RowCountCheck::Min, first, second).named(name));
        Ok(())
    }

    /// The first source has at most as many rows as the second.
    pub fn add_n_rows_max_constraint(
        &mut self,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.table_references(conditions)?;
        self.add(NRows::between(RowCountCheck::Max, first, second).named(name));
        Ok(())
    }

    fn add_relative_change(
        &mut self,
        bound: ChangeBound,
        measure: Measure,
        (first, second): (DataReference, DataReference),
        constant: Option<f64>,
        date_range_deviation: Option<f64>,
        name: Option<&str>,
    ) -> Result<()> {
        let tolerance = self.tolerance(constant, date_range_deviation)?;
        self.add(RelativeChange::new(bound, measure, first, second, tolerance).named(name));
        Ok(())
    }

    /// The first source has at most `constant_max_relative_gain` more rows than the second.
    ///
    /// With `date_range_gain_deviation` the bound is the growth of the date range plus
    /// the deviation instead.
    pub fn add_n_rows_max_gain_constraint(
        &mut self,
        constant_max_relative_gain: Option<f64>,
        date_range_gain_deviation: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let references = self.table_references(conditions)?;
        self.add_relative_change(
            ChangeBound::MaxGain,
            Measure::Rows,
            references,
            constant_max_relative_gain,
            date_range_gain_deviation,
            name,
        )
    }

    pub fn add_n_rows_min_gain_constraint(
        &mut self,
        constant_min_relative_gain: Option<f64>,
        date_range_gain_deviation: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let references = self.table_references(conditions)?;
        self.add_relative_change(
            ChangeBound::MinGain,
            Measure::Rows,
            references,
            constant_min_relative_gain,
            date_range_gain_deviation,
            name,
        )
    }

    pub fn add_n_rows_max_loss_constraint(
        &mut self,
        constant_max_relative_loss: Option<f64>,
        date_range_loss_deviation: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let references = self.table_references(conditions)?;
        self.add_relative_change(
            ChangeBound::MaxLoss,
            Measure::Rows,
            references,
            constant_max_relative_loss,
            date_range_loss_deviation,
            name,
        )
    }

    pub fn add_n_uniques_equality_constraint(
        &mut self,
        columns1: &[&str],
        columns2: &[&str],
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.references((Some(columns1), Some(columns2)), conditions)?;
        self.add(NUniquesEquality::between(first, second).named(name));
        Ok(())
    }

    pub fn add_n_uniques_max_gain_constraint(
        &mut self,
        columns1: &[&str],
        columns2: &[&str],
        constant_max_relative_gain: Option<f64>,
        date_range_gain_deviation: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let references = self.references((Some(columns1), Some(columns2)), conditions)?;
        self.add_relative_change(
            ChangeBound::MaxGain,
            Measure::Uniques,
            references,
            constant_max_relative_gain,
            date_range_gain_deviation,
            name,
        )
    }

    pub fn add_n_uniques_max_loss_constraint(
        &mut self,
        columns1: &[&str],
        columns2: &[&str],
        constant_max_relative_loss: Option<f64>,
        date_range_loss_deviation: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let references = self.references((Some(columns1), Some(columns2)), conditions)?;
        self.add_relative_change(
            ChangeBound::MaxLoss,
            Measure::Uniques,
            references,
            constant_max_relative_loss,
            date_range_loss_deviation,
            name,
        )
    }

    /// The first column's NULL fraction exceeds the second's by at most `max_relative_deviation`.
    pub fn add_max_null_fraction_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        max_relative_deviation: f64,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        self.add(MaxNullFraction::between(first, second, max_relative_deviation)?.named(name));
        Ok(())
    }

    pub fn add_numeric_min_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        self.add(NumericExtremum::between(Extremum::Min, first, second).named(name));
        Ok(())
    }

    pub fn add_numeric_max_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        self.add(NumericExtremum::between(Extremum::Max, first, second).named(name));
        Ok(())
    }

    pub fn add_numeric_mean_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        max_absolute_deviation: f64,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        self.add(NumericMean::between(first, second, max_absolute_deviation)?.named(name));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_numeric_percentile_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        percentage: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        let percentile = NumericPercentile::between(
            first,
            second,
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
        )?;
        self.add(percentile.named(name));
        Ok(())
    }

    fn add_uniques(
        &mut self,
        relation: SetRelation,
        columns: (&[&str], &[&str]),
        options: Option<UniquesOptions>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.references((Some(columns.0), Some(columns.1)), conditions)?;
        let options = options.unwrap_or_else(|| {
            UniquesOptions::default().with_output_processors(self.config.output_processors())
        });
        self.add(Uniques::between(relation, first, second, options)?.named(name));
        Ok(())
    }

    pub fn add_uniques_equality_constraint(
        &mut self,
        columns1: &[&str],
        columns2: &[&str],
        options: Option<UniquesOptions>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_uniques(SetRelation::Equality, (columns1, columns2), options, conditions, name)
    }

    /// The first source's uniques contain the second's.
    pub fn add_uniques_superset_constraint(
        &mut self,
        columns1: &[&str],
        columns2: &[&str],
        options: Option<UniquesOptions>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_uniques(SetRelation::Superset, (columns1, columns2), options, conditions, name)
    }

    /// The first source's uniques are contained in the second's.
    pub fn add_uniques_subset_constraint(
        &mut self,
        columns1: &[&str],
        columns2: &[&str],
        options: Option<UniquesOptions>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_uniques(SetRelation::Subset, (columns1, columns2), options, conditions, name)
    }

    /// With `use_lower_bound_reference` the first minimum must not be earlier than
    /// the second's; otherwise it must not be later.
    pub fn add_date_min_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        use_lower_bound_reference: bool,
        column_type: DateColumnType,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        let min = DateExtremum::between(
            Extremum::Min,
            first,
            second,
            use_lower_bound_reference,
            column_type,
        );
        self.add(min.named(name));
        Ok(())
    }

    pub fn add_date_max_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        use_upper_bound_reference: bool,
        column_type: DateColumnType,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        let max = DateExtremum::between(
            Extremum::Max,
            first,
            second,
            use_upper_bound_reference,
            column_type,
        );
        self.add(max.named(name));
        Ok(())
    }

    pub fn add_varchar_min_length_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        self.add(VarCharLength::between(Extremum::Min, first, second).named(name));
        Ok(())
    }

    pub fn add_varchar_max_length_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        self.add(VarCharLength::between(Extremum::Max, first, second).named(name));
        Ok(())
    }

    /// Every column of the first source exists in the second.
    pub fn add_column_subset_constraint(&mut self, name: Option<&str>) -> Result<()> {
        let (first, second) = self.table_references((None, None))?;
        self.add(ColumnSet::between(ColumnCheck::Subset, first, second).named(name));
        Ok(())
    }

    /// Every column of the second source exists in the first.
    pub fn add_column_superset_constraint(&mut self, name: Option<&str>) -> Result<()> {
        let (first, second) = self.table_references((None, None))?;
        self.add(ColumnSet::between(ColumnCheck::Superset, first, second).named(name));
        Ok(())
    }

    pub fn add_column_type_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, (None, None))?;
        self.add(ColumnType::between(first, second).named(name));
        Ok(())
    }

    /// At most `max_missing_fraction` of the union of rows is missing from either side.
    pub fn add_row_equality_constraint(
        &mut self,
        columns: (Option<&[&str]>, Option<&[&str]>),
        max_missing_fraction: f64,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.references(columns, conditions)?;
        let tolerance = Tolerance::Constant(max_missing_fraction);
        self.add(RowSetComparison::new(RowSetCheck::Equality, first, second, tolerance).named(name));
        Ok(())
    }

    fn add_row_containment(
        &mut self,
        check: RowSetCheck,
        columns: (Option<&[&str]>, Option<&[&str]>),
        constant_max_missing_fraction: Option<f64>,
        date_range_loss_fraction: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.references(columns, conditions)?;
        let tolerance = self.tolerance(constant_max_missing_fraction, date_range_loss_fraction)?;
        self.add(RowSetComparison::new(check, first, second, tolerance).named(name));
        Ok(())
    }

    /// At most the tolerated fraction of the first source's rows is absent from the second.
    pub fn add_row_subset_constraint(
        &mut self,
        columns: (Option<&[&str]>, Option<&[&str]>),
        constant_max_missing_fraction: Option<f64>,
        date_range_loss_fraction: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_row_containment(
            RowSetCheck::Subset,
            columns,
            constant_max_missing_fraction,
            date_range_loss_fraction,
            conditions,
            name,
        )
    }

    /// At most the tolerated fraction of the second source's rows is absent from the first.
    pub fn add_row_superset_constraint(
        &mut self,
        columns: (Option<&[&str]>, Option<&[&str]>),
        constant_max_missing_fraction: Option<f64>,
        date_range_loss_fraction: Option<f64>,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        self.add_row_containment(
            RowSetCheck::Superset,
            columns,
            constant_max_missing_fraction,
            date_range_loss_fraction,
            conditions,
            name,
        )
    }

    /// Rows matched on the matching columns must agree on the comparison columns.
    pub fn add_row_matching_equality_constraint(
        &mut self,
        matching_columns: (&[&str], &[&str]),
        comparison_columns: (&[&str], &[&str]),
        max_missing_fraction: f64,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let owned = |columns: &[&str]| columns.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        fn relevant<'a>(matching: &[&'a str], comparison: &[&'a str]) -> Vec<&'a str> {
            let mut columns: Vec<&str> = Vec::new();
            for &column in matching.iter().chain(comparison) {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
            columns
        }
        let relevant1 = relevant(matching_columns.0, comparison_columns.0);
        let relevant2 = relevant(matching_columns.1, comparison_columns.1);
        let (first, second) = self.references(
            (Some(relevant1.as_slice()), Some(relevant2.as_slice())),
            conditions,
        )?;
        let matching = RowMatchingEquality::new(
            first,
            second,
            (owned(matching_columns.0), owned(matching_columns.1)),
            (owned(comparison_columns.0), owned(comparison_columns.1)),
            max_missing_fraction,
        )?;
        self.add(matching.named(name));
        Ok(())
    }

    /// Two-sample Kolmogorov-Smirnov test between the two columns.
    ///
    /// With `cross_check` the statistic is computed both in the database and client
    /// side; the two must agree within the configured tolerance.
    pub fn add_ks_2sample_constraint(
        &mut self,
        column1: &str,
        column2: &str,
        significance_level: f64,
        cross_check: bool,
        conditions: Conditions,
        name: Option<&str>,
    ) -> Result<()> {
        let (first, second) = self.column_references(column1, column2, conditions)?;
        let computation = if cross_check {
            KsComputation::CrossChecked(self.config.ks_tolerance)
        } else {
            KsComputation::Auto
        };
        let ks = KolmogorovSmirnov2Sample::new(first, second, significance_level)?
            .with_computation(computation)?;
        self.add(ks.named(name));
        Ok(())
    }
}

impl Requirement for BetweenRequirement {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, connection};
    use arrow::array::{ArrayRef, Float64Array, Int64Array};

    fn conn() -> crate::sources::DataFusionConnection {
        let ids = |values: Vec<i64>| -> ArrayRef { Arc::new(Int64Array::from(values)) };
        let sizes = |values: Vec<f64>| -> ArrayRef { Arc::new(Float64Array::from(values)) };
        connection(vec![
            (
                "companies",
                batch(vec![("id", ids(vec![1, 2, 3, 4])), ("size", sizes(vec![1.0, 2.0, 3.0, 4.0]))]),
            ),
            (
                "companies_archive",
                batch(vec![("id", ids(vec![1, 2, 3])), ("size", sizes(vec![1.0, 2.0, 3.0]))]),
            ),
        ])
    }

    fn requirement() -> BetweenRequirement {
        BetweenRequirement::from_tables(
            ("datafusion", Some("public"), "companies"),
            ("datafusion", Some("public"), "companies_archive"),
        )
    }

    #[tokio::test]
    async fn test_growth_and_rows() {
        let conn = conn();
        let mut requirement = requirement();
        requirement
            .add_n_rows_max_gain_constraint(Some(0.5), None, (None, None), None)
            .unwrap();
        requirement
            .add_n_rows_max_gain_constraint(Some(0.2), None, (None, None), None)
            .unwrap();
        requirement
            .add_row_superset_constraint((None, None), Some(0.0), None, (None, None), None)
            .unwrap();
        requirement
            .add_numeric_min_constraint("size", "size", (None, None), None)
            .unwrap();
        requirement.add_column_subset_constraint(None).unwrap();

        let outcomes: Vec<bool> = requirement
            .test(&conn)
            .await
            .into_iter()
            .map(|r| r.unwrap().outcome)
            .collect();
        assert_eq!(outcomes, vec![true, false, true, true, true]);
    }

    #[test]
    fn test_date_range_tolerance_needs_date_columns() {
        let mut requirement = requirement();
        assert!(requirement
            .add_n_rows_max_loss_constraint(None, Some(0.1), (None, None), None)
            .is_err());
        let mut requirement = requirement.with_date_columns("founded", "founded");
        assert!(requirement
            .add_n_rows_max_loss_constraint(None, Some(0.1), (None, None), None)
            .is_ok());
    }

    #[test]
    fn test_ks_cross_check_uses_config_tolerance() {
        let config = EvaluationConfig::default().with_ks_tolerance(1e-6);
        let mut requirement = requirement().with_config(config).unwrap();
        requirement
            .add_ks_2sample_constraint("size", "size", 0.05, true, (None, None), Some("ks"))
            .unwrap();
        assert_eq!(requirement.descriptions(), vec!["ks".to_string()]);
        assert!(requirement
            .add_ks_2sample_constraint("size", "size", 2.0, false, (None, None), None)
            .is_err());
    }
}
