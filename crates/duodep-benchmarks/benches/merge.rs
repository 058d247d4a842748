//! Merge performance benchmarks
//!
//! Benchmarks include graph flattening, the full merge pipeline across
//! growing workspaces and environment file emission.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use duodep_benchmarks::{create_workspace, criterion_config, version_spec};
use duodep_core::VersionConstraint;
use duodep_resolver::{flatten, merge_documents, ConflictPolicy, MergeRequest, SelectorStyle};

/// Benchmark flattening include chains of different lengths
fn bench_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten");

    for documents in [10, 50, 200].iter() {
        group.throughput(Throughput::Elements(*documents as u64));
        let (source, root) = create_workspace(*documents, 100);

        group.bench_with_input(BenchmarkId::new("documents", documents), documents, |b, _| {
            b.iter(|| black_box(flatten(vec![root.clone()], &source).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the full merge for workspaces of different sizes
fn bench_merge_documents(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_documents");
    group.sample_size(20);

    for (documents, packages) in [(10, 50), (50, 200), (200, 500)].iter() {
        group.throughput(Throughput::Elements((*documents * 20) as u64));
        let (source, root) = create_workspace(*documents, *packages);

        for policy in [ConflictPolicy::Raise, ConflictPolicy::KeepFirst] {
            let request = MergeRequest::new().with_policy(policy);
            group.bench_with_input(
                BenchmarkId::new(format!("{}", policy), documents),
                documents,
                |b, _| {
                    b.iter(|| black_box(merge_documents(vec![root.clone()], &source, &request).unwrap()));
                },
            );
        }
    }

    group.finish();
}

/// Benchmark environment file emission in both selector styles
fn bench_environment(c: &mut Criterion) {
    let mut group = c.benchmark_group("environment");
    let (source, root) = create_workspace(50, 200);
    let output = merge_documents(vec![root], &source, &MergeRequest::new()).unwrap();

    for style in [SelectorStyle::Sel, SelectorStyle::Comment] {
        group.bench_function(format!("{}", style), |b| {
            b.iter(|| black_box(output.environment(None, style)));
        });
    }

    group.finish();
}

/// Benchmark constraint combination
fn bench_constraint_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("constraint_combine");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        let constraints: Vec<VersionConstraint> = (0..*count)
            .map(|variant| VersionConstraint::parse(&version_spec(4, variant)).unwrap())
            .collect();

        group.bench_with_input(BenchmarkId::new("constraints", count), &constraints, |b, constraints| {
            b.iter(|| {
                black_box(
                    constraints
                        .iter()
                        .try_fold(VersionConstraint::unpinned(), |acc, c| acc.combine(c))
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_flatten, bench_merge_documents, bench_environment, bench_constraint_combine
}
criterion_main!(benches);
