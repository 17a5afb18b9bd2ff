//! Shared in-memory fixtures for the integration tests.

#![allow(dead_code)]

use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use data_judge::sources::DataFusionConnection;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use std::sync::Arc;

pub const DB: &str = "datafusion";
pub const SCHEMA: &str = "public";

pub const LANGUAGES: [&str; 22] = [
    "English", "German", "French", "Spanish", "Portuguese", "Italian", "Dutch", "Polish",
    "Russian", "Turkish", "Japanese", "Korean", "Chinese", "Arabic", "Hindi", "Thai",
    "Czech", "Finnish", "Danish", "Norwegian", "Hungarian", "Sw3d1zh",
];

fn ints(values: Vec<i64>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

fn floats(values: Vec<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

fn strings(values: Vec<&str>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

fn days(values: Vec<i32>) -> ArrayRef {
    Arc::new(Date32Array::from(values))
}

fn register(ctx: &SessionContext, name: &str, columns: Vec<(&str, ArrayRef)>) {
    let batch = RecordBatch::try_from_iter(columns).expect("valid fixture batch");
    let table = MemTable::try_new(batch.schema(), vec![vec![batch]]).expect("valid mem table");
    ctx.register_table(name, Arc::new(table))
        .expect("fixture table registers");
}

/// `companies` (4 rows) and `companies_archive` (3 rows with a subset of the names).
pub fn companies() -> DataFusionConnection {
    let ctx = SessionContext::new();
    register(
        &ctx,
        "companies",
        vec![
            ("id", ints(vec![1, 2, 3, 4])),
            ("name", strings(vec!["QuantCo", "Google", "BMW", "Apple"])),
            ("num_employees", ints(vec![100, 150_000, 120_000, 145_000])),
        ],
    );
    register(
        &ctx,
        "companies_archive",
        vec![
            ("id", ints(vec![1, 2, 3])),
            ("name", strings(vec!["QuantCo", "Google", "BMW"])),
            ("num_employees", ints(vec![90, 140_000, 110_000])),
        ],
    );
    DataFusionConnection::new(ctx)
}

/// One row per language; exactly one of the 22 values contains digits.
pub fn languages() -> DataFusionConnection {
    let ctx = SessionContext::new();
    let ids: Vec<i64> = (1..=LANGUAGES.len() as i64).collect();
    register(
        &ctx,
        "languages",
        vec![("id", ints(ids)), ("language", strings(LANGUAGES.to_vec()))],
    );
    DataFusionConnection::new(ctx)
}

/// Two intervals per key that touch at their boundary, as integers and as dates.
pub fn touching_intervals() -> DataFusionConnection {
    let ctx = SessionContext::new();
    register(
        &ctx,
        "contracts",
        vec![
            ("owner", strings(vec!["a", "a", "b", "b"])),
            ("start_number", ints(vec![0, 10, 0, 10])),
            ("end_number", ints(vec![10, 20, 10, 20])),
            ("start_date", days(vec![19_000, 19_010, 19_000, 19_010])),
            ("end_date", days(vec![19_010, 19_020, 19_010, 19_020])),
        ],
    );
    DataFusionConnection::new(ctx)
}

/// Two samples of `n` values each whose empirical CDFs differ by `shift / n`.
pub fn shifted_samples(n: usize, shift: usize) -> DataFusionConnection {
    let ctx = SessionContext::new();
    let first: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let second: Vec<f64> = (0..n).map(|i| (i + shift) as f64).collect();
    register(&ctx, "sample_a", vec![("value", floats(first))]);
    register(&ctx, "sample_b", vec![("value", floats(second))]);
    DataFusionConnection::new(ctx)
}
