//! Built-in constraint families.
//!
//! Every family implements [`Constraint`](crate::core::Constraint). Families that
//! compare one retrieved value with a target of the same type go through the
//! [`Retrieve`](crate::core::Retrieve) protocol; the others run their own
//! retrieval in `test()`.
//!
//! ## Families
//!
//! | module | constraints |
//! |---|---|
//! | [`column`] | ColumnExistence, ColumnSubset, ColumnSuperset, ColumnType |
//! | [`integrity`] | PrimaryKeyDefinition, Uniqueness, FunctionalDependency, MaxNullFraction |
//! | [`nrows`] | NRowsEquality, NRowsMin, NRowsMax |
//! | [`growth`] | NRowsMaxLoss, NRowsMaxGain, NRowsMinGain, NUniquesMaxLoss, NUniquesMaxGain |
//! | [`uniques`] | UniquesEquality, UniquesSubset, UniquesSuperset, NUniquesEquality, CategoricalBound |
//! | [`numeric`] | NumericMin, NumericMax, NumericBetween, NumericMean, NumericPercentile |
//! | [`date`] | DateMin, DateMax, DateBetween |
//! | [`interval`] | NumericNoGap, NumericNoOverlap, DateNoGap, DateNoOverlap, DateNoOverlap2d |
//! | [`varchar`] | VarCharRegex, VarCharRegexDb, VarCharMinLength, VarCharMaxLength |
//! | [`row`] | RowEquality, RowSubset, RowSuperset, RowMatchingEquality |
//! | [`stats`] | KolmogorovSmirnov2Sample |
//! | [`groupby`] | AggregateNumericRangeEquality |
//!
//! ## Example
//!
//! ```rust,no_run
//! use data_judge::constraints::nrows::{NRows, RowCountCheck};
//! use data_judge::core::Constraint;
//! use data_judge::sources::{DataFusionConnection, DataReference, DataSource};
//! use datafusion::prelude::SessionContext;
//!
//! # async fn example() -> data_judge::Result<()> {
//! let conn = DataFusionConnection::new(SessionContext::new());
//! let companies = DataReference::new(DataSource::table("datafusion", Some("public"), "companies"));
//!
//! let constraint = NRows::within(RowCountCheck::Min, companies, 3);
//! let result = constraint.test(&conn).await?;
//! assert_eq!(constraint.description(), "NRowsMin::datafusion.public.companies");
//! # Ok(())
//! # }
//! ```

pub mod column;
pub mod date;
pub mod groupby;
pub mod growth;
pub mod integrity;
pub mod interval;
pub mod nrows;
pub mod numeric;
pub mod row;
pub mod stats;
pub mod uniques;
pub mod varchar;

pub use column::{ColumnCheck, ColumnSet, ColumnType, TypeFamily, TypeTarget};
pub use date::{parse_date, DateBetween, DateColumnType, DateExtremum};
pub use groupby::AggregateNumericRangeEquality;
pub use growth::{ChangeBound, Measure, RelativeChange};
pub use integrity::{
    FunctionalDependency, MaxNullFraction, PrimaryKeyDefinition, Uniqueness, UniquenessTolerance,
};
pub use interval::{IntervalKind, NoGap, NoOverlap};
pub use nrows::{NRows, RowCountCheck};
pub use numeric::{nearest_rank, NumericBetween, NumericExtremum, NumericMean, NumericPercentile};
pub use row::{RowMatchingEquality, RowSetCheck, RowSetComparison};
pub use stats::{kolmogorov_smirnov_p_value, KolmogorovSmirnov2Sample, KsComputation};
pub use uniques::{
    CategoricalBound, MapFn, NUniquesEquality, ReduceFn, SetRelation, UniqueValues, Uniques,
    UniquesOptions,
};
pub use varchar::{RegexOptions, VarCharLength, VarCharRegex, VarCharRegexDb};

pub use crate::query::Extremum;

use crate::error::Result;
use crate::sources::{Connection, DataReference, RowSet, Value};

/// Runs a count query and reads its single cell.
pub(crate) async fn fetch_count(conn: &dyn Connection, sql: &str) -> Result<u64> {
    conn.query(sql).await?.count()
}

/// Runs a query and reads the first cell of its first row.
pub(crate) async fn fetch_scalar(conn: &dyn Connection, sql: &str) -> Result<Value> {
    Ok(conn.query(sql).await?.scalar())
}

/// Renders a fraction as a percentage with six decimals.
pub(crate) fn percent(fraction: f64) -> String {
    format!("{:.6}%", fraction * 100.0)
}

/// `"<second>'s "` for Between comparisons, nothing for constant targets.
pub(crate) fn target_prefix(second: Option<&DataReference>) -> String {
    second.map(|s| format!("{s}'s ")).unwrap_or_default()
}

/// First row of a sample query as `col = value , col2 = value2`.
pub(crate) fn format_sample(rows: &RowSet) -> String {
    rows.describe_first_row()
        .unwrap_or_else(|| "None".to_string())
}
