//! Outcome records of constraint evaluations.

use crate::formatters::{DefaultFormatter, Formatter};
use serde::{Deserialize, Serialize};

/// Immutable outcome of one `test()` invocation.
///
/// A failing outcome is the normal way a constraint reports bad data. The
/// compiled queries of both sides are attached for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the expectation holds.
    pub outcome: bool,
    failure_message: Option<String>,
    constraint_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    factual_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    target_queries: Vec<String>,
}

impl TestResult {
    /// A passing result.
    pub fn success() -> Self {
        Self {
            outcome: true,
            failure_message: None,
            constraint_description: None,
            factual_queries: Vec::new(),
            target_queries: Vec::new(),
        }
    }

    /// A failing result with a human-readable explanation.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: false,
            failure_message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.constraint_description = Some(description.into());
        self
    }

    pub fn with_queries(mut self, factual: Vec<String>, target: Vec<String>) -> Self {
        self.factual_queries = factual;
        self.target_queries = target;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome
    }

    /// Failure message with markup stripped.
    pub fn failure_message(&self) -> Option<String> {
        self.formatted_failure_message(&DefaultFormatter)
    }

    /// Failure message rendered through `formatter`.
    pub fn formatted_failure_message(&self, formatter: &dyn Formatter) -> Option<String> {
        self.failure_message
            .as_deref()
            .map(|message| formatter.fmt_str(message))
    }

    /// Failure message including its markup.
    pub fn raw_failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }

    pub fn constraint_description(&self) -> Option<&str> {
        self.constraint_description.as_deref()
    }

    pub fn factual_queries(&self) -> &[String] {
        &self.factual_queries
    }

    pub fn target_queries(&self) -> &[String] {
        &self.target_queries
    }

    /// Description, failure message and every compiled query, as one SQL-comment block.
    pub fn logging_message(&self) -> String {
        self.formatted_logging_message(&DefaultFormatter)
    }

    pub fn formatted_logging_message(&self, formatter: &dyn Formatter) -> String {
        let mut message = String::new();
        if let Some(description) = &self.constraint_description {
            message.push_str(&format!("/*\n\t{}\n*/", formatter.fmt_str(description)));
        }
        if let Some(failure) = self.formatted_failure_message(formatter) {
            message.push_str(&format!("\n\n/*\nFailure message:\n{failure}\n*/"));
        }
        if !self.factual_queries.is_empty() {
            message.push_str("\n\n--Factual queries: \n ");
            message.push_str(&self.factual_queries.join("\n"));
        }
        if !self.target_queries.is_empty() {
            message.push_str("\n\n-- Target queries: \n ");
            message.push_str(&self.target_queries.join("\n"));
        }
        message.push_str("\n --- \n");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatters::HtmlFormatter;

    #[test]
    fn test_success_has_no_message() {
        let result = TestResult::success();
        assert!(result.is_success());
        assert_eq!(result.failure_message(), None);
    }

    #[test]
    fn test_logging_message_contains_queries() {
        let result = TestResult::failure("t has [numDiff]3[/numDiff] < 4 rows.")
            .with_description("NRowsMin::db.public.t")
            .with_queries(
                vec!["SELECT COUNT(*) FROM t".to_string()],
                vec!["SELECT COUNT(*) FROM u".to_string()],
            );

        let message = result.logging_message();
        assert!(message.starts_with("/*\n\tNRowsMin::db.public.t\n*/"));
        assert!(message.contains("Failure message:\nt has 3 < 4 rows."));
        assert!(message.contains("--Factual queries: \n SELECT COUNT(*) FROM t"));
        assert!(message.contains("-- Target queries: \n SELECT COUNT(*) FROM u"));
    }

    #[test]
    fn test_formatted_failure_message() {
        let result = TestResult::failure("[numDiff]3[/numDiff]");
        assert_eq!(result.failure_message().as_deref(), Some("3"));
        assert_eq!(
            result.formatted_failure_message(&HtmlFormatter).as_deref(),
            Some("<span style=\"color: red;\">3</span>")
        );
        assert_eq!(result.raw_failure_message(), Some("[numDiff]3[/numDiff]"));
    }

    #[test]
    fn test_result_serializes() {
        let result = TestResult::failure("bad").with_description("X::t");
        let json = serde_json::to_string(&result).unwrap();
        let back: TestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
