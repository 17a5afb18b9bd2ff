//! Identifier validation, case folding and quoting.
//!
//! Every path that accepts a column name (references, structured conditions,
//! constraint parameters) goes through [`fold_identifier`] before a query is built,
//! so factual and target sides of a comparison always see the same folding.

use super::{Dialect, IdentifierFolding, QuotePolicy, QuoteStyle};
use crate::error::{JudgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_IDENTIFIER_LENGTH: usize = 128;

#[allow(clippy::expect_used)]
static PLAIN_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("Failed to compile identifier regex")
});

/// Checks that an identifier can be safely quoted.
///
/// Quoting escapes the quote character itself, so any printable name is accepted;
/// empty names, control characters and overly long names are rejected.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(JudgeError::configuration("Identifier cannot be empty"));
    }

    if identifier.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(JudgeError::configuration(format!(
            "Identifier '{identifier}' exceeds {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }

    if identifier.chars().any(char::is_control) {
        return Err(JudgeError::configuration(format!(
            "Identifier {identifier:?} contains control characters"
        )));
    }

    Ok(())
}

/// Applies the dialect's capitalization rule to a column name.
///
/// Folding is idempotent: folding an already folded name returns it unchanged.
pub fn fold_identifier(dialect: Dialect, identifier: &str) -> Result<String> {
    validate_identifier(identifier)?;
    match dialect.capabilities().folding {
        IdentifierFolding::Preserve => Ok(identifier.to_string()),
        IdentifierFolding::FoldLower => Ok(identifier.to_lowercase()),
        IdentifierFolding::RequireLower => {
            if identifier.chars().any(char::is_uppercase) {
                Err(JudgeError::configuration(format!(
                    "{dialect} requires lower-case column names, got '{identifier}'"
                )))
            } else {
                Ok(identifier.to_string())
            }
        }
    }
}

/// Quotes an identifier for the dialect, escaping embedded quote characters.
pub fn quote_identifier(dialect: Dialect, identifier: &str) -> Result<String> {
    validate_identifier(identifier)?;
    let caps = dialect.capabilities();

    if caps.quote_policy == QuotePolicy::WhenNeeded && PLAIN_IDENTIFIER.is_match(identifier) {
        return Ok(identifier.to_string());
    }

    Ok(match caps.quote_style {
        QuoteStyle::DoubleQuote => format!("\"{}\"", identifier.replace('"', "\"\"")),
        QuoteStyle::Bracket => format!("[{}]", identifier.replace(']', "]]")),
        QuoteStyle::Backtick => format!("`{}`", identifier.replace('`', "\\`")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capitalization_rules() {
        assert_eq!(fold_identifier(Dialect::Mssql, "Name").unwrap(), "Name");
        assert_eq!(fold_identifier(Dialect::Snowflake, "Name").unwrap(), "name");
        assert_eq!(fold_identifier(Dialect::Impala, "NAME").unwrap(), "name");
        assert_eq!(fold_identifier(Dialect::Postgres, "name").unwrap(), "name");

        let err = fold_identifier(Dialect::Postgres, "Name").unwrap_err();
        assert!(err.to_string().contains("requires lower-case"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(
            quote_identifier(Dialect::Postgres, "num_employees").unwrap(),
            "\"num_employees\""
        );
        assert_eq!(
            quote_identifier(Dialect::Postgres, "odd\"name").unwrap(),
            "\"odd\"\"name\""
        );
        assert_eq!(quote_identifier(Dialect::Mssql, "a]b").unwrap(), "[a]]b]");
        assert_eq!(quote_identifier(Dialect::BigQuery, "col").unwrap(), "`col`");
        assert_eq!(quote_identifier(Dialect::Snowflake, "name").unwrap(), "name");
        assert_eq!(
            quote_identifier(Dialect::Snowflake, "first name").unwrap(),
            "\"first name\""
        );
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a\u{0}b").is_err());
        assert!(validate_identifier(&"x".repeat(129)).is_err());
        assert!(validate_identifier(&"x".repeat(128)).is_ok());
    }

    proptest! {
        #[test]
        fn prop_folding_is_idempotent(name in "[A-Za-z_][A-Za-z0-9_ ]{0,30}") {
            for dialect in Dialect::ALL {
                if let Ok(once) = fold_identifier(dialect, &name) {
                    let twice = fold_identifier(dialect, &once).unwrap();
                    prop_assert_eq!(once, twice);
                }
            }
        }
    }
}
