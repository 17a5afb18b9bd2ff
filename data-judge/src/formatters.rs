//! Styling of failure messages.
//!
//! Failure messages mark up matching and differing parts of numbers with
//! `[numMatch]…[/numMatch]` and `[numDiff]…[/numDiff]`. A [`Formatter`] decides
//! how that markup is rendered: stripped, ANSI-coloured for terminals, or as HTML.
//!
//! # Examples
//!
//! ```rust
//! use data_judge::formatters::{format_difference, DefaultFormatter, Formatter};
//! use data_judge::sources::Value;
//!
//! let (factual, target) = format_difference(&Value::Int(1234), &Value::Int(1299), true);
//! assert_eq!(target, "1,2[numDiff]99[/numDiff]");
//! assert_eq!(DefaultFormatter.fmt_str(&target), "1,299");
//! ```

use crate::sources::Value;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

#[allow(clippy::expect_used)]
static NUM_MATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[numMatch\](.*?)\[/numMatch\]").expect("Failed to compile numMatch regex")
});

#[allow(clippy::expect_used)]
static NUM_DIFF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[numDiff\](.*?)\[/numDiff\]").expect("Failed to compile numDiff regex")
});

/// Markup tags used inside failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    NumMatch,
    NumDiff,
}

/// Renders the markup of a failure message.
pub trait Formatter: Send + Sync {
    /// Renders the inner text of one markup span.
    fn apply(&self, markup: Markup, text: &str) -> String;

    /// Replaces every markup span of `text`.
    fn fmt_str(&self, text: &str) -> String {
        let matched = NUM_MATCH.replace_all(text, |caps: &Captures<'_>| {
            self.apply(Markup::NumMatch, &caps[1])
        });
        NUM_DIFF
            .replace_all(&matched, |caps: &Captures<'_>| {
                self.apply(Markup::NumDiff, &caps[1])
            })
            .into_owned()
    }
}

/// Strips all markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn apply(&self, _markup: Markup, text: &str) -> String {
        text.to_string()
    }
}

/// Highlights differing digits for terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiColorFormatter;

impl Formatter for AnsiColorFormatter {
    fn apply(&self, markup: Markup, text: &str) -> String {
        match markup {
            Markup::NumDiff => format!("\x1b[46m{text}\x1b[0m"),
            Markup::NumMatch => text.to_string(),
        }
    }
}

/// Wraps spans in coloured HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlFormatter;

impl Formatter for HtmlFormatter {
    fn apply(&self, markup: Markup, text: &str) -> String {
        match markup {
            Markup::NumDiff => format!("<span style=\"color: red;\">{text}</span>"),
            Markup::NumMatch => format!("<span style=\"color: green;\">{text}</span>"),
        }
    }
}

/// Serialisable formatter choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Styling {
    #[default]
    Plain,
    Ansi,
    Html,
}

impl Styling {
    pub fn formatter(self) -> Box<dyn Formatter> {
        match self {
            Styling::Plain => Box::new(DefaultFormatter),
            Styling::Ansi => Box::new(AnsiColorFormatter),
            Styling::Html => Box::new(HtmlFormatter),
        }
    }
}

/// Renders a value for [`format_difference`], optionally with thousands separators.
fn render_number(value: &Value, thousands: bool) -> String {
    let text = match value {
        Value::Float(f) if f.is_finite() => format!("{f:?}"),
        other => other.to_string(),
    };
    if !thousands || !matches!(value, Value::Int(_) | Value::Float(_)) || text.contains('e') {
        return text;
    }

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    match fraction {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

/// Marks the differing suffix of two rendered numbers with `[numDiff]`.
///
/// The common prefix stays unmarked; equal values come back unmarked.
pub fn format_difference(first: &Value, second: &Value, thousands: bool) -> (String, String) {
    let a = render_number(first, thousands);
    let b = render_number(second, thousands);
    if a == b {
        return (a, b);
    }

    let split = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()));

    let wrap = |s: &str| -> String {
        let (head, tail) = s.split_at(split);
        if tail.is_empty() {
            head.to_string()
        } else {
            format!("{head}[numDiff]{tail}[/numDiff]")
        }
    };
    (wrap(&a), wrap(&b))
}

/// `[a, 'b', None]` style rendering of a value list.
pub fn format_values(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(Value::repr).collect();
    format!("[{}]", items.join(", "))
}
