//! Test helpers for evaluating constraints against in-memory tables.

use crate::sources::{DataFusionConnection, DataReference, DataSource};
use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use std::sync::Arc;

/// Builds a record batch from named columns.
pub(crate) fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    RecordBatch::try_from_iter(columns).unwrap()
}

/// Registers every batch as a table of the default `datafusion.public` schema.
pub(crate) fn connection(tables: Vec<(&str, RecordBatch)>) -> DataFusionConnection {
    let ctx = SessionContext::new();
    for (name, batch) in tables {
        let provider = MemTable::try_new(batch.schema(), vec![vec![batch]]).unwrap();
        ctx.register_table(name, Arc::new(provider)).unwrap();
    }
    DataFusionConnection::new(ctx)
}

/// Reference to a table registered by [`connection`].
pub(crate) fn table(name: &str) -> DataReference {
    DataReference::new(DataSource::table("datafusion", Some("public"), name))
}

/// Reference to some columns of a table registered by [`connection`].
pub(crate) fn columns(name: &str, columns: &[&str]) -> DataReference {
    table(name).with_columns(columns.iter().copied()).unwrap()
}
