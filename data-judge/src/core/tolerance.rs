//! Relative tolerances of the row-count gain/loss family.

use crate::error::{JudgeError, Result};
use crate::query;
use crate::sources::{Connection, DataReference};
use tracing::debug;

/// How the allowed relative gain or loss of a Between row-count check is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Tolerance {
    /// No bound; the check always passes.
    Unbounded,
    /// A fixed relative bound.
    Constant(f64),
    /// The growth of the date range covered by each side, plus a deviation.
    ///
    /// Growth is `span(first) / span(second) - 1` where a span is the number of
    /// days between the minimum and maximum of the side's date column.
    DateRange {
        deviation: f64,
        date_column: String,
        date_column2: String,
    },
}

impl Tolerance {
    /// Picks the tolerance mode from the two mutually exclusive parameters.
    pub fn new(
        constant: Option<f64>,
        date_range_deviation: Option<f64>,
        date_columns: Option<(&str, &str)>,
    ) -> Result<Self> {
        match (constant, date_range_deviation) {
            (Some(_), Some(_)) => Err(JudgeError::configuration(
                "A constant tolerance and a date range deviation cannot both be given",
            )),
            (Some(constant), None) => Ok(Tolerance::Constant(constant)),
            (None, Some(deviation)) => {
                let (date_column, date_column2) = date_columns.ok_or_else(|| {
                    JudgeError::configuration(
                        "A date range deviation requires the requirement's date columns",
                    )
                })?;
                Ok(Tolerance::DateRange {
                    deviation,
                    date_column: date_column.to_string(),
                    date_column2: date_column2.to_string(),
                })
            }
            (None, None) => Ok(Tolerance::Unbounded),
        }
    }

    /// Computes the bound, with the queries issued to obtain it.
    pub async fn resolve(
        &self,
        conn: &dyn Connection,
        first: &DataReference,
        second: &DataReference,
    ) -> Result<(Option<f64>, Vec<String>)> {
        match self {
            Tolerance::Unbounded => Ok((None, Vec::new())),
            Tolerance::Constant(value) => Ok((Some(*value), Vec::new())),
            Tolerance::DateRange {
                deviation,
                date_column,
                date_column2,
            } => {
                let (span, sql) = date_span(conn, first, date_column).await?;
                let (span2, sql2) = date_span(conn, second, date_column2).await?;
                if span2 == 0 {
                    return Err(JudgeError::configuration(format!(
                        "Date span of {second} in column '{date_column2}' is zero"
                    )));
                }
                let growth = span as f64 / span2 as f64 - 1.0;
                debug!(span, span2, growth, "Date range growth computed");
                Ok((Some(growth + deviation), vec![sql, sql2]))
            }
        }
    }
}

/// Days between the earliest and latest date of `column`; zero without dates.
pub async fn date_span(
    conn: &dyn Connection,
    reference: &DataReference,
    column: &str,
) -> Result<(i64, String)> {
    let dated = reference.derive(
        Some(vec![column.to_string()]),
        reference.condition().cloned(),
    )?;
    let resolved = dated.resolve(conn).await?;
    let sql = query::min_max(&resolved)?;
    let rows = conn.query(&sql).await?;
    let span = match (
        rows.first_row_value(0).as_date(),
        rows.first_row_value(1).as_date(),
    ) {
        (Some(min), Some(max)) => (max - min).num_days(),
        _ => 0,
    };
    Ok((span, sql))
}
