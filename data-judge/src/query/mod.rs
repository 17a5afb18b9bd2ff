//! Dialect-aware SQL builders.
//!
//! Every builder is a pure function of one or two [`Resolved`] references. None of
//! them touch a connection, so the SQL for any dialect can be inspected and tested
//! without a live database.

pub mod interval;
pub mod ks;

use crate::error::{JudgeError, Result};
use crate::sources::Resolved;

/// Column aggregate used by min/max style retrievals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

impl Extremum {
    fn function(self) -> &'static str {
        match self {
            Extremum::Min => "MIN",
            Extremum::Max => "MAX",
        }
    }
}

fn require_columns(r: &Resolved, what: &str) -> Result<String> {
    if r.columns().is_empty() {
        return Err(JudgeError::configuration(format!(
            "{what} needs at least one column"
        )));
    }
    Ok(r.projection())
}

fn require_row_set_operations(r: &Resolved, operation: &str) -> Result<()> {
    let dialect = r.dialect();
    dialect.require(dialect.capabilities().row_set_operations, operation)
}

/// Number of rows of the selection, optionally capped at `limit`.
pub fn row_count(r: &Resolved, limit: Option<u64>) -> String {
    let inner = match limit {
        Some(n) => r.dialect().limit(&r.selection(), n as usize),
        None => r.selection(),
    };
    format!("SELECT CAST(COUNT(*) AS BIGINT) FROM ({inner}) AS dj_rows")
}

/// Number of distinct rows of the selection.
pub fn distinct_row_count(r: &Resolved) -> String {
    format!(
        "SELECT CAST(COUNT(*) AS BIGINT) FROM ({}) AS dj_rows",
        r.distinct_selection()
    )
}

/// Number of distinct rows in the union of two selections.
pub fn union_count(first: &Resolved, second: &Resolved) -> String {
    format!(
        "SELECT CAST(COUNT(*) AS BIGINT) FROM ({} {} {}) AS dj_union",
        first.selection(),
        first.dialect().union(),
        second.selection()
    )
}

/// Number of distinct rows of `first` that are absent from `second`.
pub fn except_count(first: &Resolved, second: &Resolved) -> Result<String> {
    require_row_set_operations(first, "Row set difference")?;
    Ok(format!(
        "SELECT CAST(COUNT(*) AS BIGINT) FROM ({} {} {}) AS dj_difference",
        first.selection(),
        first.dialect().except(),
        second.selection()
    ))
}

/// One row of `first` that is absent from `second`.
pub fn except_sample(first: &Resolved, second: &Resolved) -> Result<String> {
    require_row_set_operations(first, "Row set difference")?;
    let difference = format!(
        "{} {} {}",
        first.selection(),
        first.dialect().except(),
        second.selection()
    );
    Ok(first.dialect().limit(&difference, 1))
}

/// Total rows and `NULL` rows of the single column.
pub fn null_counts(r: &Resolved) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT CAST(COUNT(*) AS BIGINT), \
         CAST(SUM(CASE WHEN {column} IS NULL THEN 1 ELSE 0 END) AS BIGINT) \
         FROM ({}) AS dj_values",
        r.selection()
    ))
}

/// Minimum or maximum of the single column.
pub fn extremum(r: &Resolved, which: Extremum) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT {}({column}) FROM ({}) AS dj_values",
        which.function(),
        r.selection()
    ))
}

/// Minimum and maximum of the single column in one row.
pub fn min_max(r: &Resolved) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT MIN({column}), MAX({column}) FROM ({}) AS dj_values",
        r.selection()
    ))
}

/// Mean of the single column.
pub fn mean(r: &Resolved) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT {} FROM ({}) AS dj_values",
        r.dialect().mean(column),
        r.selection()
    ))
}

/// Nearest-rank percentile of the single column's non-null values.
///
/// Picks the smallest value whose rank `k` satisfies `k * 100 >= percentage * n`,
/// i.e. `k = max(1, ceil(percentage * n / 100))`.
pub fn percentile(r: &Resolved, percentage: f64) -> Result<String> {
    let dialect = r.dialect();
    dialect.require(
        dialect.capabilities().window_functions,
        "In-database percentile computation",
    )?;
    let column = r.column()?;
    Ok(format!(
        "SELECT MIN(dj_value) FROM (\
         SELECT {column} AS dj_value, \
         ROW_NUMBER() OVER (ORDER BY {column}) AS dj_row_num, \
         COUNT(*) OVER () AS dj_row_count \
         FROM ({}) AS dj_values WHERE {column} IS NOT NULL\
         ) AS dj_ranked WHERE dj_row_num * 100.0 >= {percentage:?} * dj_row_count",
        r.selection()
    ))
}

/// Minimum or maximum string length of the single column.
pub fn length_extremum(r: &Resolved, which: Extremum) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT {}({}) FROM ({}) AS dj_values",
        which.function(),
        r.dialect().length(column),
        r.selection()
    ))
}

/// Distinct values of the projected columns with their row counts.
pub fn uniques(r: &Resolved) -> Result<String> {
    let projection = require_columns(r, "Uniques retrieval")?;
    Ok(format!(
        "SELECT {projection}, CAST(COUNT(*) AS BIGINT) AS dj_count \
         FROM ({}) AS dj_values GROUP BY {projection}",
        r.selection()
    ))
}

/// Non-null values of the single column.
pub fn column_values(r: &Resolved) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT {column} FROM ({}) AS dj_values WHERE {column} IS NOT NULL",
        r.selection()
    ))
}

/// One duplicated tuple of the projected columns and its multiplicity.
pub fn duplicate_sample(r: &Resolved) -> Result<String> {
    let projection = require_columns(r, "Duplicate detection")?;
    let duplicates = format!(
        "SELECT {projection}, CAST(COUNT(*) AS BIGINT) AS dj_count \
         FROM ({}) AS dj_values GROUP BY {projection} HAVING COUNT(*) > 1",
        r.selection()
    );
    Ok(r.dialect().limit(&duplicates, 1))
}

/// Mismatch fraction and matched row count of two selections joined on key columns.
///
/// `matching` and `comparison` hold pairs of quoted column names (first, second).
/// Two `NULL`s compare equal.
pub fn row_mismatch(
    first: &Resolved,
    second: &Resolved,
    matching: &[(String, String)],
    comparison: &[(String, String)],
) -> Result<String> {
    require_row_set_operations(first, "Row matching")?;
    if matching.is_empty() || comparison.is_empty() {
        return Err(JudgeError::configuration(
            "Row matching needs at least one matching and one comparison column",
        ));
    }
    let join = matching
        .iter()
        .map(|(a, b)| format!("dj_first.{a} = dj_second.{b}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let equal = comparison
        .iter()
        .map(|(a, b)| {
            format!(
                "(dj_first.{a} = dj_second.{b} OR (dj_first.{a} IS NULL AND dj_second.{b} IS NULL))"
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    Ok(format!(
        "SELECT AVG(CASE WHEN {equal} THEN 0.0 ELSE 1.0 END), CAST(COUNT(*) AS BIGINT) \
         FROM ({}) AS dj_first JOIN ({}) AS dj_second ON {join}",
        first.selection(),
        second.selection()
    ))
}

fn dependency_ctes(r: &Resolved, keys: &[String]) -> Result<String> {
    let projection = require_columns(r, "Functional dependency")?;
    if keys.is_empty() {
        return Err(JudgeError::configuration(
            "Functional dependency needs at least one key column",
        ));
    }
    let key_list = keys.join(", ");
    Ok(format!(
        "WITH dj_uniques AS (SELECT DISTINCT {projection} FROM ({}) AS dj_values), \
         dj_violations AS (SELECT {key_list} FROM dj_uniques GROUP BY {key_list} HAVING COUNT(*) > 1)",
        r.selection()
    ))
}

/// Distinct tuples whose key maps to more than one dependent tuple, ordered by key
/// and then by the dependent columns.
pub fn functional_dependency_violations(r: &Resolved, keys: &[String]) -> Result<String> {
    let ctes = dependency_ctes(r, keys)?;
    let on = keys
        .iter()
        .map(|k| format!("dj_uniques.{k} = dj_violations.{k}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let order = keys
        .iter()
        .chain(r.columns().iter().filter(|c| !keys.contains(c)))
        .map(|c| format!("dj_uniques.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "{ctes} SELECT dj_uniques.* FROM dj_uniques JOIN dj_violations ON {on} ORDER BY {order}"
    ))
}

/// Number of keys that map to more than one dependent tuple.
pub fn functional_dependency_count(r: &Resolved, keys: &[String]) -> Result<String> {
    let ctes = dependency_ctes(r, keys)?;
    Ok(format!("{ctes} SELECT CAST(COUNT(*) AS BIGINT) FROM dj_violations"))
}

/// Number of distinct key tuples.
pub fn distinct_key_count(r: &Resolved, keys: &[String]) -> String {
    let key_list = keys.join(", ");
    format!(
        "SELECT CAST(COUNT(*) AS BIGINT) FROM (SELECT DISTINCT {key_list} FROM ({}) AS dj_values) AS dj_keys",
        r.selection()
    )
}

fn regex_violation_filter(r: &Resolved, pattern: &str) -> Result<String> {
    let column = r.column()?;
    let matches = r.dialect().regex_match(column, pattern)?;
    Ok(format!("{column} IS NOT NULL AND NOT ({matches})"))
}

/// Non-null rows whose value does not match `pattern`; distinct values when `aggregated`.
pub fn regex_violation_count(r: &Resolved, pattern: &str, aggregated: bool) -> Result<String> {
    let filter = regex_violation_filter(r, pattern)?;
    let selection = if aggregated {
        r.distinct_selection()
    } else {
        r.selection()
    };
    Ok(format!(
        "SELECT CAST(COUNT(*) AS BIGINT) FROM ({selection}) AS dj_values WHERE {filter}"
    ))
}

/// Rows the regex check runs over; distinct non-null values when `aggregated`.
pub fn regex_total_count(r: &Resolved, aggregated: bool) -> Result<String> {
    let column = r.column()?;
    let selection = if aggregated {
        r.distinct_selection()
    } else {
        r.selection()
    };
    Ok(format!(
        "SELECT CAST(COUNT({column}) AS BIGINT) FROM ({selection}) AS dj_values"
    ))
}

/// Distinct non-matching values, at most `limit` when given.
pub fn regex_violation_sample(r: &Resolved, pattern: &str, limit: Option<usize>) -> Result<String> {
    let filter = regex_violation_filter(r, pattern)?;
    let column = r.column()?;
    let distinct = format!(
        "SELECT DISTINCT {column} FROM ({}) AS dj_values WHERE {filter}",
        r.selection()
    );
    Ok(match limit {
        Some(n) => r.dialect().limit(&distinct, n),
        None => distinct,
    })
}

/// Non-null row count of the single column.
pub fn non_null_count(r: &Resolved) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT CAST(COUNT({column}) AS BIGINT) FROM ({}) AS dj_values",
        r.selection()
    ))
}

/// Distinct `(keys..., value)` rows for group-wise range checks, ordered by key.
pub fn grouped_values(r: &Resolved, keys: &[String], value: &str) -> Result<String> {
    if keys.is_empty() {
        return Err(JudgeError::configuration(
            "Group-wise aggregation needs at least one key column",
        ));
    }
    let key_list = keys.join(", ");
    Ok(format!(
        "SELECT DISTINCT {key_list}, {value} FROM ({}) AS dj_values WHERE {value} IS NOT NULL",
        r.selection()
    ))
}
