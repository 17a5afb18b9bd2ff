//! Constraint trait and the retrieval/comparison protocol.

use super::result::TestResult;
use crate::error::Result;
use crate::sources::{Condition, Connection, DataReference};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Values retrieved from one reference, with the queries that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval<T> {
    pub value: T,
    pub queries: Vec<String>,
}

impl<T> Retrieval<T> {
    pub fn new(value: T, queries: Vec<String>) -> Self {
        Self { value, queries }
    }

    /// A constant baseline; no query was issued.
    pub fn constant(value: T) -> Self {
        Self {
            value,
            queries: Vec::new(),
        }
    }
}

/// Comparison baseline of a constraint.
///
/// Within constraints compare retrieved data against a constant; Between
/// constraints compare two retrievals.
#[derive(Debug, Clone)]
pub enum Target<T> {
    Value(T),
    Reference(DataReference),
}

impl<T> Target<T> {
    pub fn reference(&self) -> Option<&DataReference> {
        match self {
            Target::Reference(reference) => Some(reference),
            Target::Value(_) => None,
        }
    }
}

/// Result of applying a comparison policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Pass,
    Fail(String),
}

impl Comparison {
    /// `Pass` when `holds`, otherwise a failure with the lazily built message.
    pub fn check(holds: bool, message: impl FnOnce() -> String) -> Self {
        if holds {
            Comparison::Pass
        } else {
            Comparison::Fail(message())
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Comparison::Pass)
    }

    /// Turns the comparison into a test result.
    pub fn into_result(self) -> TestResult {
        match self {
            Comparison::Pass => TestResult::success(),
            Comparison::Fail(message) => TestResult::failure(message),
        }
    }
}

/// A single, testable expectation.
#[async_trait]
pub trait Constraint: Debug + Send + Sync {
    /// Kind name, e.g. `"NRowsMin"`.
    fn kind(&self) -> &'static str;

    /// The first (or only) reference.
    fn reference(&self) -> &DataReference;

    /// The second reference of Between constraints.
    fn second_reference(&self) -> Option<&DataReference> {
        None
    }

    /// Caller-supplied name overriding the generated description.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Stable identifier: `Kind::reference[ | second reference]`.
    fn description(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => describe(self.kind(), self.reference(), self.second_reference()),
        }
    }

    /// Retrieves the values, applies the comparison policy and reports the outcome.
    async fn test(&self, conn: &dyn Connection) -> Result<TestResult>;
}

/// Families that compare one retrieved value against a target of the same type.
#[async_trait]
pub trait Retrieve: Constraint {
    type Value: Clone + Debug + Send + Sync + 'static;

    fn base(&self) -> &ConstraintBase<Self::Value>;

    /// Runs the family-specific queries against one reference.
    async fn retrieve(
        &self,
        conn: &dyn Connection,
        reference: &DataReference,
    ) -> Result<Retrieval<Self::Value>>;

    /// Applies the comparison policy.
    fn compare(&self, factual: &Self::Value, target: &Self::Value) -> Result<Comparison>;

    async fn get_factual_value(&self, conn: &dyn Connection) -> Result<Retrieval<Self::Value>> {
        self.retrieve(conn, self.base().reference()).await
    }

    async fn get_target_value(&self, conn: &dyn Connection) -> Result<Retrieval<Self::Value>> {
        match self.base().target() {
            Target::Value(value) => Ok(Retrieval::constant(value.clone())),
            Target::Reference(reference) => self.retrieve(conn, reference).await,
        }
    }

    /// The standard `test()` flow: both retrievals, then `compare`.
    #[instrument(skip(self, conn), fields(constraint.kind = self.kind()))]
    async fn evaluate(&self, conn: &dyn Connection) -> Result<TestResult> {
        let factual = self.get_factual_value(conn).await?;
        let target = self.get_target_value(conn).await?;
        let comparison = self.compare(&factual.value, &target.value)?;
        let result = finish(
            self.kind(),
            self.description(),
            comparison,
            factual.queries.clone(),
            target.queries.clone(),
        );
        self.base().remember(factual, target).await;
        Ok(result)
    }
}

/// State shared by every [`Retrieve`] family: references, target, name and the
/// most recently retrieved values.
#[derive(Debug)]
pub struct ConstraintBase<T> {
    reference: DataReference,
    target: Target<T>,
    name: Option<String>,
    last: RwLock<Option<(Retrieval<T>, Retrieval<T>)>>,
}

impl<T: Clone> ConstraintBase<T> {
    pub fn new(reference: DataReference, target: Target<T>) -> Self {
        Self {
            reference,
            target,
            name: None,
            last: RwLock::new(None),
        }
    }

    pub fn within(reference: DataReference, value: T) -> Self {
        Self::new(reference, Target::Value(value))
    }

    pub fn between(reference: DataReference, second: DataReference) -> Self {
        Self::new(reference, Target::Reference(second))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn reference(&self) -> &DataReference {
        &self.reference
    }

    pub fn target(&self) -> &Target<T> {
        &self.target
    }

    pub fn second_reference(&self) -> Option<&DataReference> {
        self.target.reference()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stores the values of the latest evaluation for later inspection.
    pub async fn remember(&self, factual: Retrieval<T>, target: Retrieval<T>) {
        *self.last.write().await = Some((factual, target));
    }

    /// Factual and target values of the latest evaluation, if any.
    pub async fn last_values(&self) -> Option<(T, T)> {
        self.last
            .read()
            .await
            .as_ref()
            .map(|(factual, target)| (factual.value.clone(), target.value.clone()))
    }
}

/// Builds the test result of a finished evaluation and logs its outcome.
///
/// Trailing whitespace left by an empty condition fragment is dropped from the
/// failure message.
pub fn finish(
    kind: &str,
    description: String,
    comparison: Comparison,
    factual_queries: Vec<String>,
    target_queries: Vec<String>,
) -> TestResult {
    let comparison = match comparison {
        Comparison::Fail(message) => Comparison::Fail(message.trim_end().to_string()),
        pass => pass,
    };
    if comparison.is_pass() {
        debug!(
            constraint.kind = kind,
            constraint.description = %description,
            result.status = "success",
            "Constraint passed"
        );
    } else {
        debug!(
            constraint.kind = kind,
            constraint.description = %description,
            result.status = "failure",
            "Constraint failed"
        );
    }
    comparison
        .into_result()
        .with_description(description)
        .with_queries(factual_queries, target_queries)
}

/// `Kind::reference` or `Kind::first | second` with shared qualifiers removed.
pub fn describe(kind: &str, first: &DataReference, second: Option<&DataReference>) -> String {
    match second {
        None => format!("{kind}::{first}"),
        Some(second) => {
            let (a, b) = uncommon_substrings(&first.to_string(), &second.to_string());
            format!("{kind}::{a} | {b}")
        }
    }
}

/// Drops the qualifiers two dotted names have in common.
pub fn uncommon_substrings(first: &str, second: &str) -> (String, String) {
    let q1: Vec<&str> = first.split('.').collect();
    let q2: Vec<&str> = second.split('.').collect();
    if q1.len() < 2 || q2.len() < 2 || q1[0] != q2[0] {
        return (first.to_string(), second.to_string());
    }
    if q1[1] != q2[1] {
        return (q1[1..].join("."), q2[1..].join("."));
    }
    (
        q1.last().copied().unwrap_or(first).to_string(),
        q2.last().copied().unwrap_or(second).to_string(),
    )
}

/// Message fragment naming the conditions a comparison ran under.
pub fn condition_string(first: Option<&Condition>, second: Option<&Condition>) -> String {
    match (first, second) {
        (None, None) => String::new(),
        (Some(a), Some(b)) if a == b => format!("Condition on both tables: {a}; "),
        (a, b) => {
            let mut text = String::new();
            if let Some(a) = a {
                text.push_str(&format!("Condition on first table: {a}; "));
            }
            if let Some(b) = b {
                text.push_str(&format!("Condition on second table: {b}; "));
            }
            text
        }
    }
}

/// Condition fragment for Within constraints.
pub fn within_condition_string(condition: Option<&Condition>) -> String {
    condition
        .map(|c| format!("Condition: {c}"))
        .unwrap_or_default()
}

/// Condition fragment appropriate for the constraint's arity.
pub fn conditions_of(constraint: &dyn Constraint) -> String {
    match constraint.second_reference() {
        None => within_condition_string(constraint.reference().condition()),
        Some(second) => condition_string(constraint.reference().condition(), second.condition()),
    }
}
