//! Override directives applied before merging.
//!
//! Skips remove packages entirely, ignored pins become unpinned, and
//! overwritten pins replace every declaration of a package with one
//! authoritative spec that the merge engine does not combine further.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use duodep_core::{CanonicalDependency, DuoError, Requirement, VersionConstraint};

use crate::ResolverResult;

/// User supplied override directives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Packages removed before merging
    #[serde(default)]
    pub skip_dependencies: Vec<String>,
    /// Packages whose pins are dropped
    #[serde(default)]
    pub ignore_pins: Vec<String>,
    /// Package name to authoritative spec
    #[serde(default)]
    pub overwrite_pins: IndexMap<String, String>,
}

/// What an override did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideKind {
    Skipped,
    PinIgnored,
    PinOverwritten { spec: String },
}

/// One override that matched at least one declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedOverride {
    pub package: String,
    #[serde(flatten)]
    pub kind: OverrideKind,
    /// Number of declarations it touched
    pub declarations: usize,
}

/// Overrides that took effect during one merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverrideReport {
    pub applied: Vec<AppliedOverride>,
}

impl OverrideReport {
    pub fn count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.skip_dependencies.is_empty()
            && self.ignore_pins.is_empty()
            && self.overwrite_pins.is_empty()
    }

    /// Add an overwrite from `"numpy >=1.26"` form
    pub fn add_overwrite(&mut self, text: &str) -> ResolverResult<()> {
        let requirement = Requirement::parse(text, "--overwrite-pin")?;
        let spec = requirement.spec.ok_or_else(|| {
            DuoError::malformed("--overwrite-pin", text, "expected `<name> <version spec>`")
        })?;
        VersionConstraint::parse(&spec)?;
        self.overwrite_pins.insert(requirement.name, spec);
        Ok(())
    }

    /// Layer `other` on top of `self`
    pub fn extend(&mut self, other: Overrides) {
        for name in other.skip_dependencies {
            if !self.skip_dependencies.contains(&name) {
                self.skip_dependencies.push(name);
            }
        }
        for name in other.ignore_pins {
            if !self.ignore_pins.contains(&name) {
                self.ignore_pins.push(name);
            }
        }
        self.overwrite_pins.extend(other.overwrite_pins);
    }
}

/// Records after overrides, plus what changed
#[derive(Debug, Clone)]
pub struct Overridden {
    pub records: Vec<CanonicalDependency>,
    pub report: OverrideReport,
    /// Manager-specific names whose constraint is authoritative
    pub authoritative: BTreeSet<String>,
}

fn matches(record: &CanonicalDependency, name: &str) -> bool {
    let base = |n: &str| n.split('[').next().unwrap_or(n).to_string();
    [record.conda_name.as_deref(), record.pip_name.as_deref()]
        .into_iter()
        .flatten()
        .any(|candidate| candidate == name || base(candidate) == name)
}

/// Apply overrides to normalized records
pub fn apply_overrides(
    records: Vec<CanonicalDependency>,
    overrides: &Overrides,
) -> ResolverResult<Overridden> {
    let mut report = OverrideReport::default();
    let mut authoritative = BTreeSet::new();

    let mut kept = Vec::with_capacity(records.len());
    let mut skipped: IndexMap<&str, usize> = IndexMap::new();
    for record in records {
        match overrides
            .skip_dependencies
            .iter()
            .find(|name| matches(&record, name))
        {
            Some(name) => {
                debug!("Skipping {} ({})", record.package_name, record.origin);
                *skipped.entry(name.as_str()).or_default() += 1;
            },
            None => kept.push(record),
        }
    }
    for (name, declarations) in skipped {
        report.applied.push(AppliedOverride {
            package: name.to_string(),
            kind: OverrideKind::Skipped,
            declarations,
        });
    }

    for name in &overrides.ignore_pins {
        let mut declarations = 0;
        for record in kept.iter_mut().filter(|r| matches(r, name)) {
            record.constraint = VersionConstraint::unpinned();
            record.spec_text.clear();
            declarations += 1;
        }
        if declarations > 0 {
            debug!("Ignoring pins of {} ({} declarations)", name, declarations);
            report.applied.push(AppliedOverride {
                package: name.clone(),
                kind: OverrideKind::PinIgnored,
                declarations,
            });
        }
    }

    for (name, spec) in &overrides.overwrite_pins {
        let constraint = VersionConstraint::parse(spec)?;
        let mut declarations = 0;
        for record in kept.iter_mut().filter(|r| matches(r, name)) {
            record.constraint = constraint.clone();
            record.spec_text = spec.clone();
            authoritative.extend(record.conda_name.iter().cloned());
            authoritative.extend(record.pip_name.iter().cloned());
            declarations += 1;
        }
        if declarations > 0 {
            debug!("Overwriting pin of {} with `{}`", name, spec);
            report.applied.push(AppliedOverride {
                package: name.clone(),
                kind: OverrideKind::PinOverwritten { spec: spec.clone() },
                declarations,
            });
        }
    }

    Ok(Overridden {
        records: kept,
        report,
        authoritative,
    })
}
