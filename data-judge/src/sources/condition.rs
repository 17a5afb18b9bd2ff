//! Filter predicates attachable to a [`DataReference`](super::DataReference).

use super::Value;
use crate::dialect::{fold_identifier, Dialect, IdentifierFolding};
use crate::error::{JudgeError, Result};
use datafusion::sql::sqlparser::dialect::GenericDialect;
use datafusion::sql::sqlparser::parser::Parser;
use std::fmt;

/// Comparison operator of a structured clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    fn is_unary(self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// A boolean filter, either raw SQL text or structured clauses.
///
/// Construction never touches the database. Column names inside structured
/// clauses are folded, quoted and checked when a query is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Raw predicate text, inserted verbatim.
    Raw(String),
    /// `column op value`
    Clause {
        column: String,
        op: Operator,
        value: Value,
    },
    /// Conjunction of at least one condition.
    All(Vec<Condition>),
    /// Disjunction of at least one condition.
    Any(Vec<Condition>),
}

impl Condition {
    /// Raw predicate text, such as `"name = 'QuantCo'"`.
    pub fn raw(text: impl Into<String>) -> Self {
        Condition::Raw(text.into())
    }

    pub fn clause(column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Condition::Clause {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::clause(column, Operator::Eq, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::clause(column, Operator::IsNull, Value::Null)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::clause(column, Operator::IsNotNull, Value::Null)
    }

    /// Conjunction of several conditions; at least one is required.
    pub fn all(conditions: Vec<Condition>) -> Result<Self> {
        if conditions.is_empty() {
            return Err(JudgeError::configuration(
                "A composite condition needs at least one member",
            ));
        }
        Ok(Condition::All(conditions))
    }

    /// Disjunction of several conditions; at least one is required.
    pub fn any(conditions: Vec<Condition>) -> Result<Self> {
        if conditions.is_empty() {
            return Err(JudgeError::configuration(
                "A composite condition needs at least one member",
            ));
        }
        Ok(Condition::Any(conditions))
    }

    /// Logical AND; the result is again a condition.
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::All(mut members) => {
                members.push(other);
                Condition::All(members)
            }
            first => Condition::All(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Any(mut members) => {
                members.push(other);
                Condition::Any(members)
            }
            first => Condition::Any(vec![first, other]),
        }
    }

    /// Columns named by structured clauses, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Condition::Raw(_) => Vec::new(),
            Condition::Clause { column, .. } => vec![column.as_str()],
            Condition::All(members) | Condition::Any(members) => {
                members.iter().flat_map(Condition::columns).collect()
            }
        }
    }

    /// Whether compiling needs the source's column list.
    pub fn has_clauses(&self) -> bool {
        !self.columns().is_empty()
    }

    /// Compiles to a predicate for `dialect`.
    ///
    /// When `known_columns` is given, clause columns must resolve against it.
    pub fn to_sql(&self, dialect: Dialect, known_columns: Option<&[String]>) -> Result<String> {
        match self {
            Condition::Raw(text) => {
                validate_raw(text)?;
                Ok(text.trim().to_string())
            }
            Condition::Clause { column, op, value } => {
                let folded = fold_identifier(dialect, column)?;
                if let Some(known) = known_columns {
                    resolve_column(dialect, &folded, known)?;
                }
                let ident = dialect.column(&folded)?;
                if op.is_unary() {
                    Ok(format!("{ident} {}", op.as_sql()))
                } else {
                    Ok(format!("{ident} {} {}", op.as_sql(), dialect.literal(value)))
                }
            }
            Condition::All(members) => join(members, "AND", dialect, known_columns),
            Condition::Any(members) => join(members, "OR", dialect, known_columns),
        }
    }
}

fn join(
    members: &[Condition],
    keyword: &str,
    dialect: Dialect,
    known_columns: Option<&[String]>,
) -> Result<String> {
    if members.is_empty() {
        return Err(JudgeError::configuration(
            "A composite condition needs at least one member",
        ));
    }
    let parts = members
        .iter()
        .map(|c| c.to_sql(dialect, known_columns).map(|sql| format!("({sql})")))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(&format!(" {keyword} ")))
}

fn validate_raw(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(JudgeError::configuration("Condition text cannot be empty"));
    }
    let probe = format!("SELECT 1 WHERE {text}");
    match Parser::parse_sql(&GenericDialect {}, &probe) {
        Ok(statements) if statements.len() == 1 => Ok(()),
        Ok(_) => Err(JudgeError::configuration(format!(
            "Condition '{text}' must be a single predicate"
        ))),
        Err(e) => Err(JudgeError::configuration(format!(
            "Malformed condition '{text}': {e}"
        ))),
    }
}

/// Finds `folded` among the source's columns.
///
/// Case-insensitive unless the dialect preserves case.
pub(crate) fn resolve_column(dialect: Dialect, folded: &str, known: &[String]) -> Result<()> {
    let preserve = dialect.capabilities().folding == IdentifierFolding::Preserve;
    let found = known.iter().any(|name| {
        if preserve {
            name == folded
        } else {
            name.eq_ignore_ascii_case(folded)
        }
    });
    if found {
        Ok(())
    } else {
        Err(JudgeError::ColumnNotFound {
            column: folded.to_string(),
            source_name: format!("[{}]", known.join(", ")),
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Raw(text) => f.write_str(text.trim()),
            Condition::Clause { column, op, .. } if op.is_unary() => {
                write!(f, "{column} {}", op.as_sql())
            }
            Condition::Clause { column, op, value } => {
                write!(f, "{column} {} {}", op.as_sql(), value.repr())
            }
            Condition::All(members) | Condition::Any(members) => {
                let keyword = if matches!(self, Condition::All(_)) {
                    " and "
                } else {
                    " or "
                };
                let parts: Vec<String> = members.iter().map(|c| format!("({c})")).collect();
                f.write_str(&parts.join(keyword))
            }
        }
    }
}

/// AND-merges two optional conditions.
pub fn merge_conditions(first: Option<&Condition>, second: Option<&Condition>) -> Option<Condition> {
    match (first, second) {
        (Some(a), Some(b)) => Some(a.clone().and(b.clone())),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_condition_passes_through() {
        let condition = Condition::raw("name = 'QuantCo'");
        assert_eq!(
            condition.to_sql(Dialect::Postgres, None).unwrap(),
            "name = 'QuantCo'"
        );
        assert_eq!(condition.to_string(), "name = 'QuantCo'");
    }

    #[test]
    fn test_structured_clause_is_folded_and_quoted() {
        let condition = Condition::eq("Name", "QuantCo");
        assert_eq!(
            condition.to_sql(Dialect::Snowflake, None).unwrap(),
            "name = 'QuantCo'"
        );
        assert_eq!(
            condition.to_sql(Dialect::Mssql, None).unwrap(),
            "[Name] = 'QuantCo'"
        );
        assert!(condition.to_sql(Dialect::Postgres, None).is_err());
    }

    #[test]
    fn test_conjunction_closure() {
        let condition = Condition::raw("a > 1")
            .and(Condition::raw("b < 2"))
            .and(Condition::is_null("c"));
        assert_eq!(condition.to_string(), "(a > 1) and (b < 2) and (c IS NULL)");
        assert_eq!(
            condition.to_sql(Dialect::DataFusion, None).unwrap(),
            "(a > 1) AND (b < 2) AND (\"c\" IS NULL)"
        );
    }

    #[test]
    fn test_unknown_column_is_configuration_error() {
        let known = vec!["name".to_string(), "num_employees".to_string()];
        let err = Condition::eq("nmae", "x")
            .to_sql(Dialect::DataFusion, Some(&known))
            .unwrap_err();
        assert!(matches!(err, JudgeError::ColumnNotFound { .. }));
        assert!(Condition::eq("NAME", "x")
            .to_sql(Dialect::Snowflake, Some(&known))
            .is_ok());
    }

    #[test]
    fn test_malformed_conditions() {
        assert!(Condition::raw("   ").to_sql(Dialect::DataFusion, None).is_err());
        assert!(Condition::raw("a = = 1")
            .to_sql(Dialect::DataFusion, None)
            .is_err());
        assert!(Condition::all(vec![]).is_err());
    }

    #[test]
    fn test_merge_conditions() {
        let a = Condition::raw("a = 1");
        let b = Condition::raw("b = 2");
        assert_eq!(
            merge_conditions(Some(&a), Some(&b)).unwrap().to_string(),
            "(a = 1) and (b = 2)"
        );
        assert_eq!(merge_conditions(None, Some(&b)), Some(b));
        assert_eq!(merge_conditions(None, None), None);
    }
}
