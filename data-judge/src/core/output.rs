//! Post-processing of value lists shown in failure messages.

use crate::error::{JudgeError, Result};
use crate::sources::Value;
use serde::{Deserialize, Serialize};

/// Default number of elements kept by [`OutputProcessor::Limit`].
pub const DEFAULT_OUTPUT_LIMIT: usize = 100;

/// Transformation applied to counterexample lists (and their counts) before
/// they are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputProcessor {
    /// Sort by count descending, then by value; `NULL` sorts first.
    Sort,
    /// Keep the first `n` elements and append a marker naming the original length.
    Limit(usize),
}

impl Default for OutputProcessor {
    fn default() -> Self {
        OutputProcessor::Limit(DEFAULT_OUTPUT_LIMIT)
    }
}

impl OutputProcessor {
    /// Applies the processor without modifying its inputs.
    pub fn apply(
        &self,
        values: &[Value],
        counts: Option<&[Value]>,
    ) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
        if let Some(counts) = counts {
            if counts.len() != values.len() {
                return Err(JudgeError::configuration(format!(
                    "Expected as many counts as values, got {} and {}",
                    counts.len(),
                    values.len()
                )));
            }
        }
        match *self {
            OutputProcessor::Sort => Ok(sort(values, counts)),
            OutputProcessor::Limit(limit) => Ok(truncate(values, counts, limit)),
        }
    }
}

fn sort(values: &[Value], counts: Option<&[Value]>) -> (Vec<Value>, Option<Vec<Value>>) {
    match counts {
        None => {
            let mut sorted = values.to_vec();
            sorted.sort();
            (sorted, None)
        }
        Some(counts) => {
            let mut pairs: Vec<(Value, Value)> =
                values.iter().cloned().zip(counts.iter().cloned()).collect();
            pairs.sort_by(|(va, ca), (vb, cb)| cb.cmp(ca).then_with(|| va.cmp(vb)));
            let (values, counts) = pairs.into_iter().unzip();
            (values, Some(counts))
        }
    }
}

fn truncate(
    values: &[Value],
    counts: Option<&[Value]>,
    limit: usize,
) -> (Vec<Value>, Option<Vec<Value>>) {
    let shorten = |items: &[Value], what: &str| -> Vec<Value> {
        if items.len() <= limit {
            return items.to_vec();
        }
        let mut kept = items[..limit].to_vec();
        kept.push(Value::Text(format!(
            "<SHORTENED OUTPUT, displaying the first {limit} / {} {what} above>",
            items.len()
        )));
        kept
    };
    (
        shorten(values, "elements"),
        counts.map(|counts| shorten(counts, "counts")),
    )
}

/// Applies every processor in order.
pub fn apply_output_processors(
    processors: &[OutputProcessor],
    values: &[Value],
    counts: Option<&[Value]>,
) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
    let mut values = values.to_vec();
    let mut counts = counts.map(<[Value]>::to_vec);
    for processor in processors {
        let (next_values, next_counts) = processor.apply(&values, counts.as_deref())?;
        values = next_values;
        counts = next_counts;
    }
    Ok((values, counts))
}
