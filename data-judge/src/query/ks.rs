//! In-database two-sample Kolmogorov-Smirnov statistic.

use crate::error::Result;
use crate::sources::Resolved;

/// Empirical CDF of the single column, one row per distinct non-null value.
fn cdf(r: &Resolved) -> Result<String> {
    let column = r.column()?;
    Ok(format!(
        "SELECT dj_value, MAX(dj_cdf) AS dj_cdf FROM (\
         SELECT {column} AS dj_value, CUME_DIST() OVER (ORDER BY {column}) AS dj_cdf \
         FROM ({}) AS dj_values WHERE {column} IS NOT NULL\
         ) AS dj_raw GROUP BY dj_value",
        r.selection()
    ))
}

/// Query computing `D = max |F1(x) - F2(x)|` over the union of both samples' values.
///
/// Both CDFs are full-outer-joined on value. Values missing on one side take the
/// most recent CDF value of that side, or 0 before its first value.
pub fn ks_statistic(first: &Resolved, second: &Resolved) -> Result<String> {
    let dialect = first.dialect();
    dialect.require(
        dialect.capabilities().window_functions,
        "In-database Kolmogorov-Smirnov statistic",
    )?;
    let cross = format!(
        "SELECT COALESCE(dj_a.dj_value, dj_b.dj_value) AS dj_value, \
         dj_a.dj_cdf AS dj_cdf1, dj_b.dj_cdf AS dj_cdf2 \
         FROM ({}) AS dj_a FULL OUTER JOIN ({}) AS dj_b ON dj_a.dj_value = dj_b.dj_value",
        cdf(first)?,
        cdf(second)?
    );
    let indexed = format!(
        "SELECT dj_value, \
         COUNT(dj_cdf1) OVER (ORDER BY dj_value) AS dj_grp1, dj_cdf1, \
         COUNT(dj_cdf2) OVER (ORDER BY dj_value) AS dj_grp2, dj_cdf2 \
         FROM ({cross}) AS dj_cross"
    );
    let filled = format!(
        "SELECT dj_value, \
         COALESCE(FIRST_VALUE(dj_cdf1) OVER (PARTITION BY dj_grp1 ORDER BY dj_value), 0) AS dj_cdf1, \
         COALESCE(FIRST_VALUE(dj_cdf2) OVER (PARTITION BY dj_grp2 ORDER BY dj_value), 0) AS dj_cdf2 \
         FROM ({indexed}) AS dj_indexed"
    );
    Ok(format!(
        "SELECT MAX(ABS(dj_cdf1 - dj_cdf2)) FROM ({filled}) AS dj_filled"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    #[test]
    fn test_ks_statistic_structure() {
        let a = Resolved::new(Dialect::Postgres, "\"a\"", &["x"], None).unwrap();
        let b = Resolved::new(Dialect::Postgres, "\"b\"", &["y"], Some("y > 0")).unwrap();
        let sql = ks_statistic(&a, &b).unwrap();
        assert!(sql.starts_with("SELECT MAX(ABS(dj_cdf1 - dj_cdf2))"));
        assert!(sql.contains("CUME_DIST() OVER (ORDER BY \"x\")"));
        assert!(sql.contains("FROM (SELECT \"y\" FROM \"b\" WHERE y > 0) AS dj_values"));
        assert!(sql.contains("FULL OUTER JOIN"));
    }

    #[test]
    fn test_ks_requires_window_functions() {
        let a = Resolved::new(Dialect::Impala, "`a`", &["x"], None).unwrap();
        assert!(ks_statistic(&a, &a).is_err());
    }
}
