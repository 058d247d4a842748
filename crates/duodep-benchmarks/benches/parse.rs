//! Requirement file and version spec parsing benchmarks
//!
//! Benchmarks parsing `requirements.yaml` and `pyproject.toml` across file
//! sizes, loading them from disk, and parsing version specs.

use camino::Utf8PathBuf;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use duodep_benchmarks::{create_pyproject_toml, create_requirements_yaml, criterion_config, version_spec};
use duodep_config::{load_document, parse_pyproject, parse_requirements_yaml};
use duodep_core::{Version, VersionConstraint};
use std::str::FromStr;

/// Benchmark requirements.yaml parsing, selector comments included
fn bench_requirements_yaml(c: &mut Criterion) {
    let mut group = c.benchmark_group("requirements_yaml");
    group.measurement_time(std::time::Duration::from_secs(5));

    for dep_count in [10, 50, 100, 500].iter() {
        group.throughput(Throughput::Elements(*dep_count as u64));
        let content = create_requirements_yaml(*dep_count);

        group.bench_with_input(BenchmarkId::new("dependencies", dep_count), &content, |b, content| {
            b.iter(|| black_box(parse_requirements_yaml(content, "bench", None).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark pyproject.toml parsing
fn bench_pyproject(c: &mut Criterion) {
    let mut group = c.benchmark_group("pyproject_toml");
    group.measurement_time(std::time::Duration::from_secs(5));

    for dep_count in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*dep_count as u64));
        let content = create_pyproject_toml(*dep_count);

        group.bench_with_input(BenchmarkId::new("dependencies", dep_count), &content, |b, content| {
            b.iter(|| black_box(parse_pyproject(content, "bench", None).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark loading a document from disk
fn bench_load_document(c: &mut Criterion) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let path = dir.join("requirements.yaml");
    std::fs::write(&path, create_requirements_yaml(100)).unwrap();

    c.bench_function("load_document", |b| {
        b.iter(|| black_box(load_document(&dir).unwrap()));
    });
}

/// Benchmark version and constraint parsing
fn bench_version_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("version_parsing");

    group.bench_function("versions", |b| {
        let versions = ["1.0", "2.31.0", "1.26.4", "3.11.0rc1", "2024.1.post2", "0.9.dev3"];
        let mut index = 0;

        b.iter(|| {
            let version = versions[index % versions.len()];
            index += 1;
            black_box(Version::from_str(version).unwrap())
        });
    });

    group.bench_function("constraints", |b| {
        let specs: Vec<String> = (0..60).map(|i| version_spec(i, i)).collect();
        let mut index = 0;

        b.iter(|| {
            let spec = &specs[index % specs.len()];
            index += 1;
            black_box(VersionConstraint::parse(spec).unwrap())
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_requirements_yaml, bench_pyproject, bench_load_document, bench_version_parsing
}
criterion_main!(benches);
