//! Typed scalar values and row sets returned by a [`Connection`](super::Connection).

use crate::error::{JudgeError, Result};
use arrow::datatypes::{DataType, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use datafusion::scalar::ScalarValue;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// A single value retrieved from, or compared against, the database.
///
/// Numeric equality is value based: `Int(1) == Float(1.0)`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Composite value of a multi-column selection.
    Tuple(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Dates, timestamps truncated to their day, and `YYYY-MM-DD` text.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    /// Collapses a single-column row to its value, otherwise builds a tuple.
    pub fn from_row(mut row: Vec<Value>) -> Value {
        if row.len() == 1 {
            row.remove(0)
        } else {
            Value::Tuple(row)
        }
    }

    /// Quoted rendering used in failure messages.
    pub fn repr(&self) -> String {
        match self {
            Value::Text(s) => format!("'{s}'"),
            Value::Date(_) | Value::Timestamp(_) => format!("'{self}'"),
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                format!("({})", inner.join(", "))
            }
            other => other.to_string(),
        }
    }

    /// Converts a DataFusion scalar into a [`Value`].
    pub fn from_scalar(scalar: &ScalarValue) -> Result<Value> {
        if scalar.is_null() {
            return Ok(Value::Null);
        }
        let value = match scalar {
            ScalarValue::Boolean(Some(b)) => Value::Bool(*b),
            ScalarValue::Int8(Some(v)) => Value::Int(i64::from(*v)),
            ScalarValue::Int16(Some(v)) => Value::Int(i64::from(*v)),
            ScalarValue::Int32(Some(v)) => Value::Int(i64::from(*v)),
            ScalarValue::Int64(Some(v)) => Value::Int(*v),
            ScalarValue::UInt8(Some(v)) => Value::Int(i64::from(*v)),
            ScalarValue::UInt16(Some(v)) => Value::Int(i64::from(*v)),
            ScalarValue::UInt32(Some(v)) => Value::Int(i64::from(*v)),
            ScalarValue::UInt64(Some(v)) => match i64::try_from(*v) {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Float(*v as f64),
            },
            ScalarValue::Float16(Some(v)) => Value::Float(f64::from(*v)),
            ScalarValue::Float32(Some(v)) => Value::Float(f64::from(*v)),
            ScalarValue::Float64(Some(v)) => Value::Float(*v),
            ScalarValue::Decimal128(Some(v), _, scale) => {
                Value::Float(*v as f64 / 10f64.powi(i32::from(*scale)))
            }
            ScalarValue::Utf8(Some(s))
            | ScalarValue::LargeUtf8(Some(s))
            | ScalarValue::Utf8View(Some(s)) => Value::Text(s.clone()),
            ScalarValue::Date32(Some(days)) => {
                NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                    .map(Value::Date)
                    .ok_or_else(|| JudgeError::Internal(format!("Date out of range: {days}")))?
            }
            ScalarValue::Date64(Some(ms)) => Value::Date(timestamp(*ms, 1_000)?.date()),
            ScalarValue::TimestampSecond(Some(v), _) => Value::Timestamp(timestamp(*v, 1)?),
            ScalarValue::TimestampMillisecond(Some(v), _) => {
                Value::Timestamp(timestamp(*v, 1_000)?)
            }
            ScalarValue::TimestampMicrosecond(Some(v), _) => {
                Value::Timestamp(timestamp(*v, 1_000_000)?)
            }
            ScalarValue::TimestampNanosecond(Some(v), _) => {
                Value::Timestamp(timestamp(*v, 1_000_000_000)?)
            }
            other => Value::Text(other.to_string()),
        };
        Ok(value)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Date(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Tuple(_) => 6,
        }
    }
}

fn timestamp(value: i64, units_per_second: i64) -> Result<NaiveDateTime> {
    let secs = value.div_euclid(units_per_second);
    let nanos = value.rem_euclid(units_per_second) * (1_000_000_000 / units_per_second);
    u32::try_from(nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| JudgeError::Internal(format!("Timestamp out of range: {value}")))
}

/// Integral float that fits an `i64`, for cross-type comparisons.
fn integral(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(x), Value::Float(y)) => match integral(*y) {
            Some(y) => x.cmp(&y),
            None => (*x as f64).total_cmp(y),
        },
        (Value::Float(_), Value::Int(_)) => compare_numbers(b, a).reverse(),
        (Value::Float(x), Value::Float(y)) => (x + 0.0).total_cmp(&(y + 0.0)),
        _ => Ordering::Equal,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (a, b) => compare_numbers(a, b),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => match integral(*f) {
                Some(i) => i.hash(state),
                None => (f + 0.0).to_bits().hash(state),
            },
            Value::Text(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::Tuple(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "({})", inner.join(", "))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Name and backend type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

/// Materialised result of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Builds a row set from Arrow record batches.
    pub fn from_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<Self> {
        let columns = schema
            .fields()
            .iter()
            .map(|field| ColumnMeta {
                name: field.name().clone(),
                type_name: sql_type_name(field.data_type()),
            })
            .collect();

        let mut rows = Vec::new();
        for batch in batches {
            for row in 0..batch.num_rows() {
                let values = batch
                    .columns()
                    .iter()
                    .map(|array| Value::from_scalar(&ScalarValue::try_from_array(array, row)?))
                    .collect::<Result<Vec<_>>>()?;
                rows.push(values);
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First value of the first row; `Null` when there are no rows.
    pub fn scalar(&self) -> Value {
        self.rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Value at `index` of the first row; `Null` when absent.
    pub fn first_row_value(&self, index: usize) -> Value {
        self.rows
            .first()
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Scalar as a non-negative count; a missing or `NULL` count is zero.
    pub fn count(&self) -> Result<u64> {
        count_of(&self.scalar())
    }

    /// Renders the first row as `col = value , col2 = value2`.
    pub fn describe_first_row(&self) -> Option<String> {
        let row = self.rows.first()?;
        let parts: Vec<String> = self
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| format!("{} = {}", column.name, value))
            .collect();
        Some(parts.join(" , "))
    }
}

/// Interprets a value as a row count.
pub fn count_of(value: &Value) -> Result<u64> {
    match value {
        Value::Null => Ok(0),
        other => other
            .as_i64()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| JudgeError::Internal(format!("Expected a count, got {other:?}"))),
    }
}

/// Lower-case SQL name of an Arrow type.
pub fn sql_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Boolean => "boolean".to_string(),
        DataType::Int8 | DataType::UInt8 => "tinyint".to_string(),
        DataType::Int16 | DataType::UInt16 => "smallint".to_string(),
        DataType::Int32 | DataType::UInt32 => "integer".to_string(),
        DataType::Int64 | DataType::UInt64 => "bigint".to_string(),
        DataType::Float16 | DataType::Float32 => "real".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => format!("decimal({p}, {s})"),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "varchar".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Timestamp(TimeUnit::Second, _)
        | DataType::Timestamp(TimeUnit::Millisecond, _)
        | DataType::Timestamp(TimeUnit::Microsecond, _)
        | DataType::Timestamp(TimeUnit::Nanosecond, _) => "timestamp".to_string(),
        other => other.to_string().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_numeric_equality_across_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert!(Value::Int(2) > Value::Float(1.5));

        let set: HashSet<Value> = [Value::Int(3), Value::Float(3.0)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_ordering_puts_null_first() {
        let mut values = vec![Value::from("b"), Value::Null, Value::Int(5), Value::from("a")];
        values.sort();
        assert_eq!(
            values,
            vec![Value::Null, Value::Int(5), Value::from("a"), Value::from("b")]
        );
    }

    #[test]
    fn test_from_scalar_dates() {
        let date = Value::from_scalar(&ScalarValue::Date32(Some(19_723))).unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));

        let ts = Value::from_scalar(&ScalarValue::TimestampMicrosecond(
            Some(1_704_067_200_500_000),
            None,
        ))
        .unwrap();
        assert_eq!(ts.as_date(), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(
            Value::from_scalar(&ScalarValue::Int64(None)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_decimal_scalar() {
        let value = Value::from_scalar(&ScalarValue::Decimal128(Some(12_345), 10, 2)).unwrap();
        assert_eq!(value.as_f64(), Some(123.45));
    }

    #[test]
    fn test_repr_and_display() {
        assert_eq!(Value::from("x").repr(), "'x'");
        assert_eq!(Value::Null.to_string(), "None");
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::from("a")]).to_string(),
            "(1, 'a')"
        );
    }

    #[test]
    fn test_count_of() {
        assert_eq!(count_of(&Value::Null).unwrap(), 0);
        assert_eq!(count_of(&Value::Int(4)).unwrap(), 4);
        assert!(count_of(&Value::Int(-1)).is_err());
    }
}
