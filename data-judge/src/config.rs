//! Evaluation settings shared by a requirement run.

use crate::core::OutputProcessor;
use crate::error::{ErrorContext, JudgeError, Result};
use crate::formatters::{Formatter, Styling};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings of one requirement run.
///
/// Serialisable so callers can persist it alongside their requirement definitions.
///
/// # Examples
///
/// ```rust
/// use data_judge::config::EvaluationConfig;
/// use data_judge::formatters::Styling;
///
/// let config = EvaluationConfig::default()
///     .with_output_limit(20)
///     .with_styling(Styling::Ansi);
/// let json = config.to_json().unwrap();
/// assert_eq!(EvaluationConfig::from_json(&json).unwrap(), config);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Counterexamples listed by regex checks; -1 lists all of them.
    pub n_counterexamples: i64,
    /// Elements kept by the default output processor.
    pub output_limit: usize,
    /// Largest accepted difference of the KS statistic between computation paths.
    pub ks_tolerance: f64,
    /// How failure-message markup is rendered in logs.
    pub styling: Styling,
    pub log: LogConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            n_counterexamples: 5,
            output_limit: crate::core::DEFAULT_OUTPUT_LIMIT,
            ks_tolerance: 1e-9,
            styling: Styling::Plain,
            log: LogConfig::default(),
        }
    }
}

impl EvaluationConfig {
    pub fn with_n_counterexamples(mut self, n: i64) -> Self {
        self.n_counterexamples = n;
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    pub fn with_ks_tolerance(mut self, tolerance: f64) -> Self {
        self.ks_tolerance = tolerance;
        self
    }

    pub fn with_styling(mut self, styling: Styling) -> Self {
        self.styling = styling;
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Rejects settings no evaluation could run with.
    pub fn validate(&self) -> Result<()> {
        if self.n_counterexamples < -1 {
            return Err(JudgeError::configuration(format!(
                "n_counterexamples must be -1 or larger, got {}",
                self.n_counterexamples
            )));
        }
        if self.ks_tolerance.is_nan() || self.ks_tolerance < 0.0 {
            return Err(JudgeError::configuration(format!(
                "ks_tolerance must be non-negative, got {}",
                self.ks_tolerance
            )));
        }
        Ok(())
    }

    pub fn formatter(&self) -> Box<dyn Formatter> {
        self.styling.formatter()
    }

    /// Default output processors for counterexample lists.
    pub fn output_processors(&self) -> Vec<OutputProcessor> {
        vec![OutputProcessor::Limit(self.output_limit)]
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
