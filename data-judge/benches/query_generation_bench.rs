//! Benchmarks for compiling constraint queries across dialects.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use data_judge::dialect::Dialect;
use data_judge::query;
use data_judge::sources::{Condition, DataSource, Operator, Resolved};
use std::hint::black_box;

fn resolved(dialect: Dialect, columns: &[&str]) -> Resolved {
    let source = DataSource::table("analytics", Some("public"), "companies");
    let relation = source.relation(dialect).unwrap();
    let filter = Condition::clause("num_employees", Operator::Gt, 100)
        .and(Condition::is_not_null("name"))
        .to_sql(dialect, None)
        .unwrap();
    Resolved::new(dialect, relation, columns, Some(filter.as_str())).unwrap()
}

fn bench_single_source_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_source_queries");

    for dialect in Dialect::ALL {
        let reference = resolved(dialect, &["name"]);
        group.bench_with_input(
            BenchmarkId::new("row_count", dialect),
            &reference,
            |b, r| b.iter(|| query::row_count(black_box(r), None)),
        );
        group.bench_with_input(BenchmarkId::new("uniques", dialect), &reference, |b, r| {
            b.iter(|| query::uniques(black_box(r)))
        });
        group.bench_with_input(
            BenchmarkId::new("percentile", dialect),
            &resolved(dialect, &["num_employees"]),
            |b, r| b.iter(|| query::percentile(black_box(r), black_box(90.0))),
        );
        group.bench_with_input(
            BenchmarkId::new("regex_violations", dialect),
            &reference,
            |b, r| b.iter(|| query::regex_violation_count(black_box(r), "^[A-Z]", true).ok()),
        );
    }

    group.finish();
}

fn bench_paired_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("paired_queries");

    for dialect in Dialect::ALL {
        let first = resolved(dialect, &["name"]);
        let second = resolved(dialect, &["name"]);
        group.bench_function(BenchmarkId::new("except_count", dialect), |b| {
            b.iter(|| query::except_count(black_box(&first), black_box(&second)).ok())
        });
        group.bench_function(BenchmarkId::new("ks_statistic", dialect), |b| {
            b.iter(|| query::ks::ks_statistic(black_box(&first), black_box(&second)).ok())
        });
    }

    group.finish();
}

fn bench_condition_compilation(c: &mut Criterion) {
    let known: Vec<String> = ["id", "name", "num_employees"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let condition = Condition::any(vec![
        Condition::eq("name", "QuantCo"),
        Condition::clause("num_employees", Operator::GtEq, 1000)
            .and(Condition::clause("id", Operator::Lt, 50)),
        Condition::raw("name LIKE 'B%'"),
    ])
    .unwrap();

    c.bench_function("condition_to_sql", |b| {
        b.iter(|| {
            black_box(&condition)
                .to_sql(Dialect::Postgres, Some(known.as_slice()))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_single_source_queries,
    bench_paired_queries,
    bench_condition_compilation
);
criterion_main!(benches);
