//! Dependency merge engine for duodep
//!
//! This crate turns parsed dependency documents into per-platform conda and
//! pip dependency lists:
//! - `normalize`: raw entries to canonical records
//! - `graph`: include traversal with cycle detection
//! - `overrides`: skip, ignore-pin and overwrite-pin directives
//! - `merge`: per-platform constraint combination with Minimal Scope Selection
//! - `policy`: raise or keep-first handling of intractable conflicts
//! - `emit`: requirement strings, PEP 508 markers and environment files

pub mod emit;
pub mod graph;
pub mod merge;
pub mod normalize;
pub mod overrides;
pub mod policy;

// Re-export main types
pub use emit::{EnvironmentSpec, MergeOutput, PlatformView, SelectorStyle};
pub use graph::{flatten, Flattened, IncludeGraph, MemorySource, RootRequest};
pub use merge::{merge, try_merge, MergeConflict, MergedSet, ResolvedRecord};
pub use normalize::{normalize_entries, normalize_entry};
pub use overrides::{apply_overrides, OverrideReport, Overrides};
pub use policy::{merge_with_policy, ConflictPolicy, ConflictWarning};

use duodep_core::error::DuoError;
use duodep_core::types::DocumentSource;
use duodep_core::PlatformSet;
use tracing::debug;

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, DuoError>;

/// Inputs of one merge besides the documents
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    /// Platforms to resolve for; `None` uses what the documents declare
    pub platforms: Option<PlatformSet>,
    pub overrides: Overrides,
    pub policy: ConflictPolicy,
}

impl MergeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platforms(mut self, platforms: PlatformSet) -> Self {
        self.platforms = Some(platforms);
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Requested platforms, else the declared ones, else every platform
    pub fn targets(&self, flattened: &Flattened) -> PlatformSet {
        let targets = self
            .platforms
            .or(flattened.platforms)
            .unwrap_or_else(PlatformSet::all);
        if targets.is_empty() {
            PlatformSet::all()
        } else {
            targets
        }
    }
}

/// Merge an already flattened document set
pub fn merge_flattened(flattened: Flattened, request: &MergeRequest) -> ResolverResult<MergeOutput> {
    let targets = request.targets(&flattened);
    debug!(
        "Merging {} entries for [{}]",
        flattened.entries.len(),
        targets
    );

    let records = normalize_entries(&flattened.entries, targets)?;
    let overridden = apply_overrides(records, &request.overrides)?;
    let (merged, warnings) = merge_with_policy(
        overridden.records,
        targets,
        &overridden.authoritative,
        request.policy,
    )?;

    Ok(MergeOutput {
        targets,
        name: flattened.names.into_iter().next(),
        conda: merged.conda,
        pip: merged.pip,
        channels: flattened.channels,
        pip_indices: flattened.pip_indices,
        local_packages: flattened.local_packages,
        overrides: overridden.report,
        warnings,
    })
}

/// Flatten `roots` through `source` and merge them
pub fn merge_documents(
    roots: Vec<RootRequest>,
    source: &dyn DocumentSource,
    request: &MergeRequest,
) -> ResolverResult<MergeOutput> {
    let flattened = flatten(roots, source)?;
    merge_flattened(flattened, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use duodep_core::types::{LocalPackage, LocalPackageKind};
    use duodep_core::{Document, Platform};

    fn doc(path: &str) -> Document {
        Document::new(path).with_path(path)
    }

    #[test]
    fn test_merge_documents_end_to_end() {
        let mut source = MemorySource::new();
        source.insert(
            doc("/repo/lib/requirements.yaml")
                .with_channel("conda-forge")
                .with_dependency("numpy <2")
                .with_dependency("cuda-toolkit:linux64"),
        );
        source.insert_package(LocalPackage {
            path: Utf8PathBuf::from("/repo/tools"),
            kind: LocalPackageKind::Project {
                pip_installable: true,
            },
        });
        let mut root = doc("/repo/app/requirements.yaml")
            .with_channel("conda-forge")
            .with_channel("nvidia")
            .with_dependency("numpy >=1.20")
            .with_local_dependency("../lib")
            .with_local_dependency("../tools");
        root.name = Some("app".to_string());

        let request = MergeRequest::new();
        let out = merge_documents(vec![RootRequest::new(root)], &source, &request).unwrap();

        assert_eq!(out.name.as_deref(), Some("app"));
        assert_eq!(out.channels, vec!["conda-forge", "nvidia"]);
        assert_eq!(out.targets, PlatformSet::all());
        assert_eq!(
            out.for_platform(Platform::Linux64).conda,
            vec!["numpy >=1.20,<2", "cuda-toolkit"]
        );
        assert_eq!(out.for_platform(Platform::OsxArm64).conda, vec!["numpy >=1.20,<2"]);
        assert_eq!(out.local_packages.len(), 1);
    }

    #[test]
    fn test_targets_fall_back_to_declared_platforms() {
        let root = doc("/r/requirements.yaml")
            .with_platforms(&[Platform::Linux64, Platform::Osx64])
            .with_dependency("numpy");
        let source = MemorySource::new();
        let out = merge_documents(vec![RootRequest::new(root.clone())], &source, &MergeRequest::new())
            .unwrap();
        assert_eq!(out.targets.len(), 2);

        let request = MergeRequest::new().with_platforms(PlatformSet::single(Platform::Win64));
        let out = merge_documents(vec![RootRequest::new(root)], &source, &request).unwrap();
        assert_eq!(out.targets, PlatformSet::single(Platform::Win64));
        assert_eq!(out.conda[0].platforms, PlatformSet::single(Platform::Win64));
    }

    #[test]
    fn test_overrides_and_policy_flow_through() {
        let root = doc("/r/requirements.yaml")
            .with_dependency("foo >1")
            .with_dependency("foo <1")
            .with_dependency("bar >=2")
            .with_dependency("baz");
        let source = MemorySource::new();

        let err = merge_documents(vec![RootRequest::new(root.clone())], &source, &MergeRequest::new())
            .unwrap_err();
        assert!(err.is_conflict());

        let mut overrides = Overrides {
            ignore_pins: vec!["bar".to_string()],
            skip_dependencies: vec!["baz".to_string()],
            ..Overrides::default()
        };
        overrides.add_overwrite("foo =1.5").unwrap();
        let request = MergeRequest::new().with_overrides(overrides);
        let out = merge_documents(vec![RootRequest::new(root.clone())], &source, &request).unwrap();
        let linux = out.for_platform(Platform::Linux64);
        assert_eq!(linux.conda, vec!["foo =1.5", "bar"]);
        assert_eq!(linux.pip, vec!["foo ==1.5", "bar"]);
        assert_eq!(out.overridden(), vec!["baz", "bar", "foo"]);

        let request = MergeRequest::new().with_policy(ConflictPolicy::KeepFirst);
        let out = merge_documents(vec![RootRequest::new(root)], &source, &request).unwrap();
        assert_eq!(out.for_platform(Platform::Win64).conda[0], "foo >1");
        assert_eq!(out.warnings.len(), 2);
    }

    #[test]
    fn test_cycle_aborts_without_output() {
        let mut source = MemorySource::new();
        source.insert(doc("/r/a/requirements.yaml").with_local_dependency("../b"));
        source.insert(doc("/r/b/requirements.yaml").with_local_dependency("../a"));
        let root = doc("/r/a/requirements.yaml").with_local_dependency("../b");
        let err = merge_documents(vec![RootRequest::new(root)], &source, &MergeRequest::new())
            .unwrap_err();
        assert!(matches!(err, DuoError::CyclicInclude { .. }));
    }
}
