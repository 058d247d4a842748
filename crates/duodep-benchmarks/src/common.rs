//! Common utilities for benchmarks

use criterion::Criterion;
use duodep_core::{Document, Platform};
use duodep_resolver::{MemorySource, RootRequest};
use pprof::criterion::{Output, PProfProfiler};

/// Configure criterion with flamegraph profiling support
pub fn criterion_config() -> Criterion {
    Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(3))
        .measurement_time(std::time::Duration::from_secs(10))
        .sample_size(100)
        .with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)))
}

const SPECS: [&str; 6] = [">=1.{i}", "<{j}", ">=0.{i},<{j}", "", "~=1.{i}", "!=1.{i}.1"];

/// A version spec that stays compatible with every other spec for `package`
pub fn version_spec(package: usize, variant: usize) -> String {
    let i = (package % 7).to_string();
    let j = (package % 5 + 3).to_string();
    SPECS[variant % SPECS.len()].replace("{i}", &i).replace("{j}", &j)
}

/// A dependency line with an optional platform selector
pub fn dependency_line(package: usize, variant: usize) -> String {
    let spec = version_spec(package, variant);
    let selector = match variant % 4 {
        1 => ":linux64",
        2 => ":osx win",
        _ => "",
    };
    if spec.is_empty() {
        format!("pkg{}{}", package, selector)
    } else {
        format!("pkg{} {}{}", package, spec, selector)
    }
}

/// A chain of `documents` projects, each depending on the next, sharing a
/// pool of `packages` package names
pub fn create_workspace(documents: usize, packages: usize) -> (MemorySource, RootRequest) {
    let mut source = MemorySource::new();
    let mut root = None;

    for index in 0..documents {
        let path = format!("/bench/project{}/requirements.yaml", index);
        let mut document = Document::new(path.as_str())
            .with_path(path.as_str())
            .with_channel("conda-forge")
            .with_platforms(&[
                Platform::Linux64,
                Platform::LinuxAarch64,
                Platform::Osx64,
                Platform::OsxArm64,
                Platform::Win64,
            ]);
        for offset in 0..packages.min(20) {
            let package = (index * 3 + offset) % packages;
            document = document.with_dependency(&dependency_line(package, index + offset));
        }
        if index % 3 == 0 {
            document = document.with_qualified(Some("pytorch"), Some("torch"));
        }
        if index + 1 < documents {
            document = document.with_local_dependency(&format!("../project{}", index + 1));
        }

        if index == 0 {
            root = Some(document.clone());
        }
        source.insert(document);
    }

    let root = root.unwrap_or_else(|| Document::new("/bench/empty").with_path("/bench/empty"));
    (source, RootRequest::new(root))
}

/// `requirements.yaml` text with `count` dependencies
pub fn create_requirements_yaml(count: usize) -> String {
    let mut text = String::from("name: bench\nchannels:\n  - conda-forge\ndependencies:\n");
    for package in 0..count {
        let line = dependency_line(package, package);
        match line.split_once(':') {
            Some((requirement, selector)) => {
                text.push_str(&format!("  - {}  # [{}]\n", requirement, selector))
            },
            None => text.push_str(&format!("  - {}\n", line)),
        }
        if package % 10 == 0 {
            text.push_str(&format!("  - conda: cpkg{}\n    pip: ppkg{}\n", package, package));
        }
    }
    text
}

/// `pyproject.toml` text with a `[tool.duodep]` table and `count` dependencies
pub fn create_pyproject_toml(count: usize) -> String {
    let mut text = String::from("[project]\nname = \"bench\"\ndependencies = [\"requests\"]\n\n");
    text.push_str("[tool.duodep]\nchannels = [\"conda-forge\"]\ndependencies = [\n");
    for package in 0..count {
        text.push_str(&format!("    \"{}\",\n", dependency_line(package, package)));
    }
    text.push_str("]\n");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use duodep_resolver::{merge_documents, MergeRequest};

    #[test]
    fn test_generated_workspace_merges() {
        let (source, root) = create_workspace(10, 30);
        let output = merge_documents(vec![root], &source, &MergeRequest::new()).unwrap();
        assert!(!output.conda.is_empty());
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_generated_files_parse() {
        let yaml = create_requirements_yaml(25);
        let doc = duodep_config::parse_requirements_yaml(&yaml, "bench", None).unwrap();
        assert_eq!(doc.name.as_deref(), Some("bench"));

        let toml = create_pyproject_toml(25);
        let doc = duodep_config::parse_pyproject(&toml, "bench", None).unwrap();
        assert!(doc.is_some());
    }
}
