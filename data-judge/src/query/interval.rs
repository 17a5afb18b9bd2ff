//! Overlap and gap detection over interval columns.
//!
//! Column arguments are quoted column expressions of the resolved reference.
//! Violations are reported per key group; without key columns the whole
//! selection forms a single group.

use crate::error::{JudgeError, Result};
use crate::sources::Resolved;

/// Interval column layout of one overlap or gap check.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalColumns {
    pub keys: Vec<String>,
    pub starts: Vec<String>,
    pub ends: Vec<String>,
}

impl IntervalColumns {
    pub fn new(keys: Vec<String>, starts: Vec<String>, ends: Vec<String>) -> Result<Self> {
        if starts.is_empty() || starts.len() != ends.len() {
            return Err(JudgeError::configuration(format!(
                "Expected the same, non-zero number of start and end columns, got {} and {}",
                starts.len(),
                ends.len()
            )));
        }
        Ok(Self { keys, starts, ends })
    }

    pub fn dimensions(&self) -> usize {
        self.starts.len()
    }

    /// Keys followed by every start and end column.
    pub fn all(&self) -> Vec<String> {
        self.keys
            .iter()
            .chain(&self.starts)
            .chain(&self.ends)
            .cloned()
            .collect()
    }

    fn qualified_keys(&self, alias: &str) -> Vec<String> {
        self.keys.iter().map(|k| format!("{alias}.{k}")).collect()
    }

    fn key_join(&self, left: &str, right: &str) -> Vec<String> {
        self.keys
            .iter()
            .map(|k| format!("{left}.{k} = {right}.{k}"))
            .collect()
    }
}

/// Interval kind of a gap check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GapKind {
    /// Gap measured in whole days.
    Date,
    /// Gap measured as a plain difference.
    Numeric,
}

/// Sample and count queries of one interval check.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalQueries {
    /// At most one violating row.
    pub sample: String,
    /// Number of key groups with at least one violation.
    pub violation_count: String,
    /// Number of key groups.
    pub key_count: String,
}

fn group_count(relation: &str, keys: &[String]) -> String {
    if keys.is_empty() {
        return format!(
            "SELECT CAST(CASE WHEN COUNT(*) > 0 THEN 1 ELSE 0 END AS BIGINT) FROM ({relation}) AS dj_groups"
        );
    }
    let key_list = keys.join(", ");
    format!(
        "SELECT CAST(COUNT(*) AS BIGINT) FROM (SELECT {key_list} FROM ({relation}) AS dj_groups GROUP BY {key_list}) AS dj_keys"
    )
}

/// Queries finding pairs of intervals within a key group that intersect.
///
/// With `end_included` intervals are closed, so `[a, b]` and `[b, c]` overlap;
/// otherwise they are half-open and merely adjacent. Rows that repeat the same
/// key and interval count as overlapping too.
pub fn overlaps(r: &Resolved, columns: &IntervalColumns, end_included: bool) -> Result<IntervalQueries> {
    let selection = r.with_projection(columns.all()).selection();
    let end_operator = if end_included { ">=" } else { ">" };

    let mut conditions = columns.key_join("dj_left", "dj_right");
    for (s, e) in columns.starts.iter().zip(&columns.ends) {
        conditions.push(format!("dj_left.{s} <= dj_right.{s}"));
        conditions.push(format!("dj_left.{e} {end_operator} dj_right.{s}"));
    }
    let inequality = columns
        .starts
        .iter()
        .zip(&columns.ends)
        .map(|(s, e)| format!("dj_left.{s} <> dj_right.{s} OR dj_left.{e} <> dj_right.{e}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    conditions.push(format!("({inequality})"));

    let mut pair_projection: Vec<String> = columns
        .keys
        .iter()
        .map(|k| format!("dj_left.{k} AS {k}"))
        .collect();
    let mut duplicate_projection = columns.keys.clone();
    for (i, (s, e)) in columns.starts.iter().zip(&columns.ends).enumerate() {
        pair_projection.push(format!("dj_left.{s} AS dj_start1_{i}"));
        pair_projection.push(format!("dj_right.{s} AS dj_start2_{i}"));
        pair_projection.push(format!("dj_left.{e} AS dj_end1_{i}"));
        pair_projection.push(format!("dj_right.{e} AS dj_end2_{i}"));
        duplicate_projection.push(format!("{s} AS dj_start1_{i}"));
        duplicate_projection.push(format!("{s} AS dj_start2_{i}"));
        duplicate_projection.push(format!("{e} AS dj_end1_{i}"));
        duplicate_projection.push(format!("{e} AS dj_end2_{i}"));
    }

    let all = columns.all().join(", ");
    let duplicates = format!(
        "SELECT {} FROM ({selection}) AS dj_duplicates GROUP BY {all} HAVING COUNT(*) > 1",
        duplicate_projection.join(", ")
    );
    let pairs = format!(
        "SELECT {} FROM ({selection}) AS dj_left JOIN ({selection}) AS dj_right ON {}",
        pair_projection.join(", "),
        conditions.join(" AND ")
    );
    let violations = format!("{duplicates} UNION ALL {pairs}");

    Ok(IntervalQueries {
        sample: r.dialect().limit(&violations, 1),
        violation_count: group_count(&violations, &columns.keys),
        key_count: group_count(&selection, &columns.keys),
    })
}

/// Queries finding gaps wider than `legitimate_gap` in the coverage of a key group.
///
/// Every start is compared with the latest end among the intervals of its group
/// that start strictly before it. The first start of a group has nothing to
/// compare with.
pub fn gaps(
    r: &Resolved,
    columns: &IntervalColumns,
    kind: GapKind,
    legitimate_gap: f64,
) -> Result<IntervalQueries> {
    if columns.dimensions() != 1 {
        return Err(JudgeError::configuration(
            "Gap detection is only defined for one-dimensional intervals",
        ));
    }
    let dialect = r.dialect();
    let (s, e) = (&columns.starts[0], &columns.ends[0]);
    let selection = r.with_projection(columns.all()).selection();

    let mut join = columns.key_join("dj_start", "dj_prior");
    join.push(format!("dj_prior.{s} < dj_start.{s}"));
    let mut grouping = columns.qualified_keys("dj_start");
    grouping.push(format!("dj_start.{s}"));
    let mut projection: Vec<String> = columns
        .keys
        .iter()
        .map(|k| format!("dj_start.{k} AS {k}"))
        .collect();
    projection.push(format!("dj_start.{s} AS {s}"));
    projection.push(format!("MAX(dj_prior.{e}) AS {e}"));
    let covered = format!(
        "SELECT {} FROM ({selection}) AS dj_start JOIN ({selection}) AS dj_prior ON {} GROUP BY {}",
        projection.join(", "),
        join.join(" AND "),
        grouping.join(", ")
    );

    let gap = match kind {
        GapKind::Date => dialect.days_between(&format!("dj_covered.{s}"), &format!("dj_covered.{e}")),
        GapKind::Numeric => format!("dj_covered.{s} - dj_covered.{e}"),
    };
    let violations = format!(
        "SELECT * FROM ({covered}) AS dj_covered WHERE {gap} > {legitimate_gap:?}"
    );

    Ok(IntervalQueries {
        sample: dialect.limit(&violations, 1),
        violation_count: group_count(&violations, &columns.keys),
        key_count: group_count(&selection, &columns.keys),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn resolved(dialect: Dialect) -> Resolved {
        Resolved::new(dialect, "\"intervals\"", &[], None).unwrap()
    }

    fn columns(keys: &[&str], starts: &[&str], ends: &[&str]) -> IntervalColumns {
        let quote = |cs: &[&str]| cs.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>();
        IntervalColumns::new(quote(keys), quote(starts), quote(ends)).unwrap()
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let err = IntervalColumns::new(vec![], vec!["a".into()], vec![]).unwrap_err();
        assert!(err.to_string().contains("start and end columns"));
    }

    #[test]
    fn test_overlap_end_operator() {
        let cols = columns(&["id"], &["start"], &["end"]);
        let open = overlaps(&resolved(Dialect::Postgres), &cols, false).unwrap();
        assert!(open.sample.contains("dj_left.\"end\" > dj_right.\"start\""));
        let closed = overlaps(&resolved(Dialect::Postgres), &cols, true).unwrap();
        assert!(closed.sample.contains("dj_left.\"end\" >= dj_right.\"start\""));
    }

    #[test]
    fn test_overlap_inequality_compares_both_sides() {
        let cols = columns(&[], &["s"], &["e"]);
        let queries = overlaps(&resolved(Dialect::Postgres), &cols, false).unwrap();
        assert!(queries
            .violation_count
            .contains("dj_left.\"e\" <> dj_right.\"e\""));
        assert!(queries.key_count.contains("CASE WHEN COUNT(*) > 0"));
    }

    #[test]
    fn test_two_dimensional_overlap() {
        let cols = columns(&["id"], &["s1", "s2"], &["e1", "e2"]);
        assert_eq!(cols.dimensions(), 2);
        let queries = overlaps(&resolved(Dialect::Postgres), &cols, true).unwrap();
        assert!(queries.sample.contains("dj_left.\"e2\" >= dj_right.\"s2\""));
        assert!(queries.sample.contains("dj_start2_1"));
    }

    #[test]
    fn test_gap_compares_with_latest_prior_end() {
        let cols = columns(&["id"], &["s"], &["e"]);
        let queries = gaps(&resolved(Dialect::Postgres), &cols, GapKind::Numeric, 0.0).unwrap();
        assert!(queries.sample.contains("MAX(dj_prior.\"e\") AS \"e\""));
        assert!(queries
            .sample
            .contains("dj_start.\"id\" = dj_prior.\"id\" AND dj_prior.\"s\" < dj_start.\"s\""));
        assert!(queries.sample.contains("GROUP BY dj_start.\"id\", dj_start.\"s\""));
        assert!(queries.sample.contains("dj_covered.\"s\" - dj_covered.\"e\" > 0.0"));
    }

    #[test]
    fn test_date_gap_uses_dialect_day_difference() {
        let cols = columns(&[], &["s"], &["e"]);
        let queries = gaps(&resolved(Dialect::Snowflake), &cols, GapKind::Date, 1.0).unwrap();
        assert!(queries
            .sample
            .contains("DATEDIFF(day, dj_covered.\"e\", dj_covered.\"s\") > 1.0"));
        assert!(queries.sample.contains("GROUP BY dj_start.\"s\""));

        // No window functions involved, so every dialect can run it.
        assert!(gaps(&resolved(Dialect::Impala), &cols, GapKind::Date, 1.0).is_ok());
    }

    #[test]
    fn test_gap_needs_one_dimension() {
        let cols = columns(&[], &["s1", "s2"], &["e1", "e2"]);
        assert!(gaps(&resolved(Dialect::Postgres), &cols, GapKind::Numeric, 0.0).is_err());
    }
}
