//! Integration tests for WithinRequirement against in-memory DataFusion tables.

mod common;

use common::{companies, languages, touching_intervals, DB, SCHEMA};
use data_judge::error::ErrorKind;
use data_judge::prelude::*;

fn companies_requirement() -> WithinRequirement {
    WithinRequirement::from_table(DB, Some(SCHEMA), "companies")
}

#[tokio::test]
async fn test_companies_basics_pass() {
    let conn = companies();
    let mut requirement = companies_requirement();
    requirement.add_column_existence_constraint(["name"], None);
    requirement
        .add_n_rows_min_constraint(1, Some(Condition::eq("name", "QuantCo")), None)
        .unwrap();
    requirement
        .add_numeric_min_constraint("num_employees", 1, None, None)
        .unwrap();

    for outcome in requirement.test(&conn).await {
        let result = outcome.unwrap();
        assert!(result.outcome, "{}", result.logging_message());
    }
}

#[tokio::test]
async fn test_failures_carry_queries_and_values() {
    let conn = companies();
    let mut requirement = companies_requirement();
    requirement.add_n_rows_equality_constraint(5, None, None).unwrap();

    let result = requirement.test(&conn).await.remove(0).unwrap();
    assert!(!result.outcome);
    assert_eq!(
        result.constraint_description(),
        Some("NRowsEquality::datafusion.public.companies")
    );
    assert!(!result.factual_queries().is_empty());

    let message = result.logging_message();
    assert!(message.starts_with("/*\n\tNRowsEquality::datafusion.public.companies\n*/"));
    assert!(message.contains("--Factual queries:"));
    assert!(!message.contains("[numDiff]"));
}

#[tokio::test]
async fn test_uniques_and_uniqueness() {
    let conn = companies();
    let mut requirement = companies_requirement();
    requirement
        .add_uniqueness_constraint(Some(vec!["id".to_string()]), None, None, false, None, None)
        .unwrap();
    requirement
        .add_uniques_superset_constraint(&["name"], ["QuantCo", "BMW"], None, None, None)
        .unwrap();
    requirement
        .add_uniques_equality_constraint(&["name"], ["QuantCo", "BMW"], None, None, None)
        .unwrap();
    requirement
        .add_n_uniques_equality_constraint(&["name"], 4, None, None)
        .unwrap();

    let outcomes: Vec<bool> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap().outcome)
        .collect();
    assert_eq!(outcomes, vec![true, true, false, true]);
}

#[tokio::test]
async fn test_unknown_column_does_not_stop_siblings() {
    let conn = companies();
    let mut requirement = companies_requirement();
    requirement
        .add_numeric_max_constraint("nme", 10, None, None)
        .unwrap();
    requirement
        .add_column_type_constraint("id", TypeTarget::Family(TypeFamily::Integer), None)
        .unwrap();

    let mut results = requirement.test(&conn).await;
    let typed = results.pop().unwrap().unwrap();
    assert!(typed.outcome, "{}", typed.logging_message());

    let err = results.pop().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("'nme'"));
}

#[tokio::test]
async fn test_language_regex_reports_counterexample() {
    let conn = languages();
    let mut requirement = WithinRequirement::from_table(DB, Some(SCHEMA), "languages");
    let options = RegexOptions::default().with_aggregated(false);
    requirement
        .add_varchar_regex_constraint("language", "^[a-zA-Z]+$", Some(options), None, None)
        .unwrap();
    requirement
        .add_varchar_regex_constraint_db("language", "^[a-zA-Z]+$", None, None, None)
        .unwrap();

    for outcome in requirement.test(&conn).await {
        let result = outcome.unwrap();
        assert!(!result.outcome);
        let message = result.failure_message().unwrap();
        assert!(message.contains("1 of the 22 samples"), "{message}");
        assert!(message.contains(&(1.0_f64 / 22.0).to_string()), "{message}");
        assert!(message.contains("'Sw3d1zh'"), "{message}");
    }
}

#[tokio::test]
async fn test_language_regex_within_tolerance() {
    let conn = languages();
    let mut requirement = WithinRequirement::from_table(DB, Some(SCHEMA), "languages");
    let options = RegexOptions::default().with_relative_tolerance(0.05);
    requirement
        .add_varchar_regex_constraint("language", "^[a-zA-Z]+$", Some(options), None, None)
        .unwrap();
    requirement
        .add_varchar_max_length_constraint("language", 10, None, None)
        .unwrap();

    let outcomes: Vec<bool> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap().outcome)
        .collect();
    assert_eq!(outcomes, vec![true, true]);
}

#[tokio::test]
async fn test_touching_intervals_depend_on_end_inclusion() {
    let conn = touching_intervals();
    let mut requirement = WithinRequirement::from_table(DB, Some(SCHEMA), "contracts");
    let half_open = IntervalOptions::default()
        .with_key_columns(["owner"])
        .with_end_included(false);
    let closed = IntervalOptions::default().with_key_columns(["owner"]);

    requirement
        .add_numeric_no_overlap_constraint("start_number", "end_number", half_open.clone())
        .unwrap();
    requirement
        .add_numeric_no_overlap_constraint("start_number", "end_number", closed.clone())
        .unwrap();
    requirement
        .add_date_no_overlap_constraint("start_date", "end_date", half_open)
        .unwrap();
    requirement
        .add_date_no_overlap_constraint("start_date", "end_date", closed.clone())
        .unwrap();
    requirement
        .add_date_no_gap_constraint("start_date", "end_date", closed)
        .unwrap();

    let outcomes: Vec<bool> = requirement
        .test(&conn)
        .await
        .into_iter()
        .map(|r| r.unwrap().outcome)
        .collect();
    assert_eq!(outcomes, vec![true, false, true, false, true]);
}
