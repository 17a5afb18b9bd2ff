//! Core evaluation types.
//!
//! ## Overview
//!
//! - **[`Constraint`]**: one testable expectation over one or two
//!   [`DataReference`](crate::sources::DataReference)s
//! - **[`Retrieve`]**: the retrieve-then-compare protocol most constraint families follow
//! - **[`TestResult`]**: the outcome of a single evaluation, with the queries it ran
//! - **[`WithinRequirement`] / [`BetweenRequirement`]**: ordered constraint collections
//!   over one or two fixed sources
//!
//! ```text
//! WithinRequirement (companies)
//!     ├── NRowsMin
//!     ├── UniquesEquality(name)
//!     └── VarCharRegex(name)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use data_judge::prelude::*;
//! use datafusion::prelude::SessionContext;
//!
//! # async fn example() -> data_judge::Result<()> {
//! let conn = DataFusionConnection::new(SessionContext::new());
//! // ... register the companies table ...
//!
//! let mut requirement = WithinRequirement::from_table("datafusion", Some("public"), "companies");
//! requirement.add_n_rows_min_constraint(3, None, None)?;
//!
//! for outcome in requirement.test(&conn).await {
//!     let result = outcome?;
//!     if !result.outcome {
//!         println!("{}", result.logging_message());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod constraint;
pub mod output;
pub mod requirement;
pub mod result;
pub mod tolerance;

pub use constraint::{
    condition_string, conditions_of, describe, finish, uncommon_substrings, within_condition_string,
    Comparison, Constraint, ConstraintBase, Retrieval, Retrieve, Target,
};
pub use output::{apply_output_processors, OutputProcessor, DEFAULT_OUTPUT_LIMIT};
pub use requirement::{
    BetweenRequirement, IntervalOptions, RegexOptions, Requirement, UniquesOptions,
    WithinRequirement,
};
pub use result::TestResult;
pub use tolerance::Tolerance;
