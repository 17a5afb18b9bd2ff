//! Date extrema and date ranges.

use super::numeric::fraction_between;
use super::{fetch_scalar, target_prefix};
use crate::core::{
    conditions_of, Comparison, Constraint, ConstraintBase, Retrieval, Retrieve, TestResult,
};
use crate::error::{JudgeError, Result};
use crate::query::{self, Extremum};
use crate::sources::{Connection, DataReference, Value};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::str::FromStr;
use tracing::instrument;

/// Input format of date bounds.
const INPUT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage type of the date column, used when the backend hands back text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateColumnType {
    #[default]
    Date,
    Timestamp,
}

impl DateColumnType {
    fn format(self) -> &'static str {
        match self {
            DateColumnType::Date => INPUT_DATE_FORMAT,
            DateColumnType::Timestamp => "%Y-%m-%d %H:%M:%S",
        }
    }

    /// Converts a retrieved value to its day; text is parsed with the column's format.
    pub fn to_date(self, value: &Value) -> Result<Option<NaiveDate>> {
        match value {
            Value::Null => Ok(None),
            Value::Date(d) => Ok(Some(*d)),
            Value::Timestamp(ts) => Ok(Some(ts.date())),
            Value::Text(text) => {
                // Fractional seconds are dropped before parsing.
                let text = text.split('.').next().unwrap_or(text);
                let parsed = match self {
                    DateColumnType::Date => NaiveDate::parse_from_str(text, self.format()),
                    DateColumnType::Timestamp => {
                        NaiveDateTime::parse_from_str(text, self.format()).map(|ts| ts.date())
                    }
                };
                parsed.map(Some).map_err(|e| {
                    JudgeError::configuration(format!("Cannot read '{text}' as {self:?}: {e}"))
                })
            }
            other => Err(JudgeError::configuration(format!(
                "Value {other} cannot be converted to a date"
            ))),
        }
    }
}

impl FromStr for DateColumnType {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "date" => Ok(DateColumnType::Date),
            "datetime" | "datetime2" | "smalldatetime" | "timestamp" => Ok(DateColumnType::Timestamp),
            _ => Err(JudgeError::configuration(format!("Illegal date column type: {s}"))),
        }
    }
}

/// Parses a `YYYY-MM-DD` bound.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, INPUT_DATE_FORMAT).map_err(|e| {
        JudgeError::configuration(format!("Expected a date as YYYY-MM-DD, got '{text}': {e}"))
    })
}

/// Earliest or latest date of a column compared with a bound.
///
/// `use_bound_reference` selects the direction: for `Min` the column's minimum must
/// be at least the bound when set and at most the bound otherwise; `Max` mirrors it.
#[derive(Debug)]
pub struct DateExtremum {
    which: Extremum,
    use_bound_reference: bool,
    column_type: DateColumnType,
    base: ConstraintBase<Option<NaiveDate>>,
}

impl DateExtremum {
    pub fn within(
        which: Extremum,
        reference: DataReference,
        bound: &str,
        use_bound_reference: bool,
        column_type: DateColumnType,
    ) -> Result<Self> {
        Ok(Self {
            which,
            use_bound_reference,
            column_type,
            base: ConstraintBase::within(reference, Some(parse_date(bound)?)),
        })
    }

    pub fn between(
        which: Extremum,
        reference: DataReference,
        second: DataReference,
        use_bound_reference: bool,
        column_type: DateColumnType,
    ) -> Self {
        Self {
            which,
            use_bound_reference,
            column_type,
            base: ConstraintBase::between(reference, second),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }

    pub async fn last_values(&self) -> Option<(Option<NaiveDate>, Option<NaiveDate>)> {
        self.base.last_values().await
    }
}

#[async_trait]
impl Constraint for DateExtremum {
    fn kind(&self) -> &'static str {
        match self.which {
            Extremum::Min => "DateMin",
            Extremum::Max => "DateMax",
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
impl Retrieve for DateExtremum {
    type Value = Option<NaiveDate>;

    fn base(&self) -> &ConstraintBase<Option<NaiveDate>> {
        &self.base
    }

    #[instrument(skip(self, conn, reference), fields(constraint.kind = self.kind()))]
    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Option<NaiveDate>>> {
        let resolved = reference.resolve(conn).await?;
        let sql = query::extremum(&resolved, self.which)?;
        let value = fetch_scalar(conn, &sql).await?;
        Ok(Retrieval::new(self.column_type.to_date(&value)?, vec![sql]))
    }

    fn compare(
        &self,
        factual: &Option<NaiveDate>,
        target: &Option<NaiveDate>,
    ) -> Result<Comparison> {
        let reference = self.reference();
        let prefix = target_prefix(self.second_reference());
        let conditions = conditions_of(self);
        let (factual, target) = match (self.which, factual, target) {
            (Extremum::Min, _, None) => return Ok(Comparison::Pass),
            (Extremum::Min, None, Some(_)) => {
                return Ok(Comparison::Fail("Empty set.".to_string()))
            }
            (Extremum::Max, None, _) => return Ok(Comparison::Pass),
            (Extremum::Max, Some(_), None) => {
                return Ok(Comparison::Fail("Empty reference set.".to_string()))
            }
            (_, Some(f), Some(t)) => (*f, *t),
        };
        let (name, holds, sign) = match (self.which, self.use_bound_reference) {
            (Extremum::Min, true) => ("min", factual >= target, "<"),
            (Extremum::Min, false) => ("min", factual <= target, ">"),
            (Extremum::Max, true) => ("max", factual <= target, ">"),
            (Extremum::Max, false) => ("max", factual >= target, "<"),
        };
        Ok(Comparison::check(holds, || {
            format!("{reference} has {name} {factual} {sign} {prefix}{target}. {conditions}")
        }))
    }
}

/// At least `min_fraction` of the rows fall between two dates, both inclusive.
#[derive(Debug)]
pub struct DateBetween {
    lower: NaiveDate,
    upper: NaiveDate,
    base: ConstraintBase<Option<f64>>,
}

impl DateBetween {
    pub fn new(reference: DataReference, lower: &str, upper: &str, min_fraction: f64) -> Result<Self> {
        let (lower, upper) = (parse_date(lower)?, parse_date(upper)?);
        if lower > upper {
            return Err(JudgeError::configuration(format!(
                "Lower bound {lower} is after upper bound {upper}"
            )));
        }
        if !(0.0..=1.0).contains(&min_fraction) {
            return Err(JudgeError::configuration(format!(
                "min_fraction has to be between 0 and 1, got {min_fraction}"
            )));
        }
        Ok(Self {
            lower,
            upper,
            base: ConstraintBase::within(reference, Some(min_fraction)),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_name(name);
        self
    }
}

#[async_trait]
impl Constraint for DateBetween {
    fn kind(&self) -> &'static str {
        "DateBetween"
    }

    fn reference(&self) -> &DataReference {
        self.base.reference()
    }

    fn name(&self) -> Option<&str> {
        self.base.name()
    }

    async fn test(&self, conn: &dyn Connection) -> Result<TestResult> {
        self.evaluate(conn).await
    }
}

#[async_trait]
impl Retrieve for DateBetween {
    type Value = Option<f64>;

    fn base(&self) -> &ConstraintBase<Option<f64>> {
        &self.base
    }

    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Option<f64>>> {
        let (fraction, queries) = fraction_between(
            conn,
            reference,
            &Value::Date(self.lower),
            &Value::Date(self.upper),
        )
        .await?;
        Ok(Retrieval::new(fraction, queries))
    }

    fn compare(&self, factual: &Option<f64>, target: &Option<f64>) -> Result<Comparison> {
        let (Some(factual), Some(target)) = (factual, target) else {
            return Ok(Comparison::Pass);
        };
        let reference = self.reference();
        let conditions = conditions_of(self);
        Ok(Comparison::check(factual >= target, || {
            format!(
                "{reference} has {factual} < {target} of values between {} and {}. {conditions}",
                self.lower, self.upper
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, columns, connection};
    use arrow::array::{ArrayRef, Date32Array, StringArray};
    use std::sync::Arc;

    fn days(dates: &[&str]) -> ArrayRef {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        Arc::new(Date32Array::from(
            dates
                .iter()
                .map(|d| (parse_date(d).unwrap() - epoch).num_days() as i32)
                .collect::<Vec<_>>(),
        ))
    }

    fn conn() -> crate::sources::DataFusionConnection {
        let text: ArrayRef = Arc::new(StringArray::from(vec![
            "2021-03-01 10:00:00.123",
            "2021-05-01 00:00:00",
        ]));
        connection(vec![
            ("events", batch(vec![("day", days(&["2021-01-01", "2021-02-15", "2021-06-30"]))])),
            ("archive", batch(vec![("day", days(&["2020-12-01", "2021-06-30"]))])),
            ("raw", batch(vec![("stamp", text)])),
        ])
    }

    #[test]
    fn test_column_type_parsing() {
        assert_eq!("DATE".parse::<DateColumnType>().unwrap(), DateColumnType::Date);
        assert_eq!(
            "datetime2".parse::<DateColumnType>().unwrap(),
            DateColumnType::Timestamp
        );
        assert!("interval".parse::<DateColumnType>().is_err());
        assert_eq!(
            DateColumnType::Timestamp
                .to_date(&Value::from("2021-03-01 10:00:00.123"))
                .unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 1)
        );
        assert!(DateColumnType::Date.to_date(&Value::Int(3)).is_err());
        assert!(parse_date("01.02.2021").is_err());
    }

    #[tokio::test]
    async fn test_date_min_within() {
        let conn = conn();
        let day = columns("events", &["day"]);
        let lower = DateExtremum::within(Extremum::Min, day.clone(), "2021-01-01", true, DateColumnType::Date)
            .unwrap();
        assert!(lower.test(&conn).await.unwrap().outcome);

        let lower = DateExtremum::within(Extremum::Min, day.clone(), "2021-01-02", true, DateColumnType::Date)
            .unwrap();
        let result = lower.test(&conn).await.unwrap();
        assert_eq!(
            result.failure_message().as_deref(),
            Some("datafusion.public.events's column(s) 'day' has min 2021-01-01 < 2021-01-02.")
        );

        let upper = DateExtremum::within(Extremum::Min, day, "2020-12-31", false, DateColumnType::Date)
            .unwrap();
        assert!(!upper.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_date_max_between() {
        let conn = conn();
        let max = DateExtremum::between(
            Extremum::Max,
            columns("events", &["day"]),
            columns("archive", &["day"]),
            true,
            DateColumnType::Date,
        );
        assert!(max.test(&conn).await.unwrap().outcome);
        assert_eq!(
            max.last_values().await,
            Some((NaiveDate::from_ymd_opt(2021, 6, 30), NaiveDate::from_ymd_opt(2021, 6, 30)))
        );

        let min = DateExtremum::between(
            Extremum::Min,
            columns("archive", &["day"]),
            columns("events", &["day"]),
            true,
            DateColumnType::Date,
        );
        let message = min.test(&conn).await.unwrap().failure_message().unwrap();
        assert!(message.contains("has min 2020-12-01 < datafusion.public.events's column(s) 'day''s 2021-01-01"));
    }

    #[tokio::test]
    async fn test_text_timestamps() {
        let conn = conn();
        let max = DateExtremum::within(
            Extremum::Max,
            columns("raw", &["stamp"]),
            "2021-05-01",
            true,
            DateColumnType::Timestamp,
        )
        .unwrap();
        assert!(max.test(&conn).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_date_between() {
        let conn = conn();
        let day = columns("events", &["day"]);
        let between = DateBetween::new(day.clone(), "2021-01-01", "2021-02-15", 0.6).unwrap();
        assert!(between.test(&conn).await.unwrap().outcome);

        let between = DateBetween::new(day, "2021-01-02", "2021-12-31", 0.9).unwrap();
        let message = between.test(&conn).await.unwrap().failure_message().unwrap();
        assert!(message.contains("of values between 2021-01-02 and 2021-12-31."));

        assert!(DateBetween::new(columns("events", &["day"]), "2021-02-01", "2021-01-01", 0.5).is_err());
    }
}
