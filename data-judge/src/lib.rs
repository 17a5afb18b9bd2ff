//! # data-judge - Declarative data-quality constraints
//!
//! data-judge evaluates data-quality expectations against tables, views and
//! queries. Expectations are expressed as constraints that either inspect a
//! single source ("within") or compare a source against a second one
//! ("between"). Every constraint compiles down to SQL for the configured
//! [`Dialect`](dialect::Dialect); DataFusion is the bundled backend.
//!
//! ## Quick Start
//!
//! ```rust
//! use data_judge::prelude::*;
//! use datafusion::arrow::array::{ArrayRef, Int64Array, StringArray};
//! use datafusion::arrow::record_batch::RecordBatch;
//! use datafusion::prelude::SessionContext;
//! use std::sync::Arc;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let ctx = SessionContext::new();
//! let companies = RecordBatch::try_from_iter(vec![
//!     ("id", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
//!     ("name", Arc::new(StringArray::from(vec!["QuantCo", "Google", "BMW"])) as ArrayRef),
//! ])?;
//! ctx.register_batch("companies", companies)?;
//! let conn = DataFusionConnection::new(ctx);
//!
//! let mut requirement = WithinRequirement::from_table("datafusion", Some("public"), "companies");
//! requirement.add_uniqueness_constraint(Some(vec!["id".into()]), None, None, false, None, None)?;
//! requirement.add_varchar_regex_constraint("name", r"^[A-Z][A-Za-z]+$", None, None, None)?;
//!
//! for outcome in requirement.test(&conn).await {
//!     let result = outcome?;
//!     assert!(result.outcome, "{}", result.logging_message());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`dialect`**: per-backend capability table and identifier handling
//! - **`sources`**: data sources, references, conditions and the [`Connection`](sources::Connection) seam
//! - **`query`**: SQL builders, one per retrieval shape
//! - **`core`**: the [`Constraint`](core::Constraint) contract, results and requirements
//! - **`constraints`**: the constraint families
//! - **`formatters`**: markup rendering of failure messages
//! - **`config`** / **`logging`**: evaluation settings and structured logging
//!
//! ## Results
//!
//! A [`TestResult`](core::TestResult) carries the outcome, a failure message
//! with `[numDiff]`-style markup, and the factual and target queries that were
//! run. [`Formatter`](formatters::Formatter)s render the markup for terminals or
//! HTML reports.

pub mod config;
pub mod constraints;
pub mod core;
pub mod dialect;
pub mod error;
pub mod formatters;
pub mod logging;
pub mod prelude;
pub mod query;
pub mod sources;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{JudgeError, Result};
