//! Prelude for commonly used types and traits in data-judge.

pub use crate::config::EvaluationConfig;
pub use crate::constraints::{DateColumnType, Extremum, TypeFamily, TypeTarget};
pub use crate::core::{
    BetweenRequirement, Constraint, IntervalOptions, RegexOptions, Requirement, TestResult,
    UniquesOptions, WithinRequirement,
};
pub use crate::dialect::Dialect;
pub use crate::error::{ErrorContext, JudgeError, Result};
pub use crate::formatters::{Formatter, Styling};
pub use crate::logging::LogConfig;
pub use crate::sources::{
    Condition, Connection, DataFusionConnection, DataReference, DataSource, Value,
};
