//! Integration tests for BetweenRequirement: current tables against archives.

mod common;

use common::{companies, shifted_samples, DB, SCHEMA};
use data_judge::constraints::kolmogorov_smirnov_p_value;
use data_judge::prelude::*;

fn companies_vs_archive() -> BetweenRequirement {
    BetweenRequirement::from_tables(
        (DB, Some(SCHEMA), "companies"),
        (DB, Some(SCHEMA), "companies_archive"),
    )
}

#[tokio::test]
async fn test_archive_names_are_contained() {
    let conn = companies();
    let mut requirement = companies_vs_archive();
    requirement
        .add_row_superset_constraint(
            (Some(&["name"][..]), Some(&["name"][..])),
            Some(0.0),
            None,
            (None, None),
            None,
        )
        .unwrap();
    requirement
        .add_row_subset_constraint(
            (Some(&["name"][..]), Some(&["name"][..])),
            Some(0.0),
            None,
            (None, None),
            None,
        )
        .unwrap();

    let results: Vec<TestResult> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(results[0].outcome, "{}", results[0].logging_message());
    assert!(!results[1].outcome);
    assert_eq!(
        results[1].constraint_description(),
        Some("RowSubset::companies's column(s) 'name' | companies_archive's column(s) 'name'")
    );
}

#[tokio::test]
async fn test_row_count_bounds_between_snapshots() {
    let conn = companies();
    let mut requirement = companies_vs_archive();
    requirement.add_n_rows_min_constraint((None, None), None).unwrap();
    requirement.add_n_rows_max_constraint((None, None), None).unwrap();
    // Two current companies above 130 000 employees against three archived rows.
    requirement
        .add_n_rows_max_constraint(
            (Some(Condition::raw("num_employees > 130000")), None),
            Some("few large companies"),
        )
        .unwrap();

    let results: Vec<TestResult> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let outcomes: Vec<bool> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![true, false, true]);
    assert_eq!(
        results[1].constraint_description(),
        Some("NRowsMax::companies | companies_archive")
    );
    assert!(results[1]
        .failure_message()
        .unwrap()
        .starts_with("datafusion.public.companies has"));
}

#[tokio::test]
async fn test_growth_between_snapshots() {
    let conn = companies();
    let mut requirement = companies_vs_archive();
    // 4 rows against 3: a gain of one third.
    requirement
        .add_n_rows_max_gain_constraint(Some(0.4), None, (None, None), None)
        .unwrap();
    requirement
        .add_n_rows_min_gain_constraint(Some(0.5), None, (None, None), Some("enough growth"))
        .unwrap();
    requirement
        .add_n_rows_max_loss_constraint(Some(0.0), None, (None, None), None)
        .unwrap();
    requirement
        .add_n_uniques_max_gain_constraint(&["name"], &["name"], Some(0.5), None, (None, None), None)
        .unwrap();

    let results: Vec<TestResult> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let outcomes: Vec<bool> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![true, false, true, true]);
    assert_eq!(results[1].constraint_description(), Some("enough growth"));
}

#[tokio::test]
async fn test_columns_and_values_between_snapshots() {
    let conn = companies();
    let mut requirement = companies_vs_archive();
    requirement.add_column_subset_constraint(None).unwrap();
    requirement.add_column_superset_constraint(None).unwrap();
    requirement.add_column_type_constraint("id", "id", None).unwrap();
    requirement
        .add_uniques_superset_constraint(&["name"], &["name"], None, (None, None), None)
        .unwrap();
    requirement
        .add_numeric_min_constraint("num_employees", "num_employees", (None, None), None)
        .unwrap();
    requirement
        .add_varchar_max_length_constraint("name", "name", (None, None), None)
        .unwrap();

    let outcomes: Vec<bool> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap().outcome)
        .collect();
    assert_eq!(outcomes, vec![true, true, true, true, true, true]);
}

#[tokio::test]
async fn test_shifted_samples_fail_ks() {
    let n = 926;
    let shift = 141;
    let conn = shifted_samples(n, shift);
    let mut requirement = BetweenRequirement::from_tables(
        (DB, Some(SCHEMA), "sample_a"),
        (DB, Some(SCHEMA), "sample_b"),
    );
    requirement
        .add_ks_2sample_constraint("value", "value", 0.05, true, (None, None), None)
        .unwrap();

    let result = requirement.test(&conn).await.remove(0).unwrap();
    assert!(!result.outcome);
    let message = result.failure_message().unwrap();
    assert!(message.contains("has p-value"), "{message}");
    assert!(message.contains("< 0.05"), "{message}");

    let p_value = kolmogorov_smirnov_p_value(shift as f64 / n as f64, n as u64, n as u64);
    assert!(p_value < 1e-8);
}

#[tokio::test]
async fn test_similar_samples_pass_ks() {
    let conn = shifted_samples(200, 2);
    let mut requirement = BetweenRequirement::from_tables(
        (DB, Some(SCHEMA), "sample_a"),
        (DB, Some(SCHEMA), "sample_b"),
    );
    requirement
        .add_ks_2sample_constraint("value", "value", 0.05, false, (None, None), None)
        .unwrap();

    let result = requirement.test(&conn).await.remove(0).unwrap();
    assert!(result.outcome, "{}", result.logging_message());
}
