//! Cross-file, cross-platform merge engine
//!
//! Records are grouped per package manager on the manager-specific name.
//! Each group is resolved one target platform at a time: the records active
//! on that platform are folded with [`VersionConstraint::combine`], narrowest
//! declared scope first. Platforms that end up with the same result are then
//! re-aggregated into as few records as possible.
//!
//! The engine itself always fails on an intractable conflict. Downgrading a
//! conflict to a warning is the caller's decision, see [`crate::policy`].

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use duodep_core::types::{ConstraintConflict, Dialect};
use duodep_core::{
    CanonicalDependency, DuoError, Origin, Platform, PlatformSet, Side, VersionConstraint,
};

use crate::ResolverResult;

/// One merged package for one manager, valid on a set of platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRecord {
    pub side: Side,
    /// Manager-specific name, including pip extras
    pub name: String,
    /// Reference name used in diagnostics
    pub package_name: String,
    pub constraint: VersionConstraint,
    pub platforms: PlatformSet,
    /// First declaration contributing to this record
    pub origin: Origin,
    /// Pip records only: conda also installs this package on these platforms
    pub also_conda: bool,
}

impl ResolvedRecord {
    /// Requirement string for this record's manager
    pub fn requirement(&self) -> String {
        let spec = match self.side {
            Side::Conda => self.constraint.conda_spec(),
            Side::Pip => self.constraint.pip_spec(),
        };
        match spec {
            Some(spec) => format!("{} {}", self.name, spec),
            None => self.name.clone(),
        }
    }
}

/// Result of one merge: both managers' records over the target platforms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedSet {
    pub targets: PlatformSet,
    pub conda: Vec<ResolvedRecord>,
    pub pip: Vec<ResolvedRecord>,
}

impl MergedSet {
    pub fn records(&self, side: Side) -> &[ResolvedRecord] {
        match side {
            Side::Conda => &self.conda,
            Side::Pip => &self.pip,
        }
    }

    /// Records of one manager active on one platform, in output order
    pub fn active_on(&self, side: Side, platform: Platform) -> impl Iterator<Item = &ResolvedRecord> {
        self.records(side)
            .iter()
            .filter(move |record| record.platforms.contains(platform))
    }
}

/// An intractable conflict between two declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub side: Side,
    /// Manager-specific package name
    pub package: String,
    /// Platforms both declarations are active on
    pub platforms: PlatformSet,
    /// Earlier declaration
    pub first: CanonicalDependency,
    /// Later declaration
    pub second: CanonicalDependency,
    pub reason: ConstraintConflict,
}

impl MergeConflict {
    /// Sequence index of the later declaration
    pub fn later_sequence(&self) -> usize {
        self.first.origin.sequence.max(self.second.origin.sequence)
    }
}

impl From<MergeConflict> for DuoError {
    fn from(conflict: MergeConflict) -> Self {
        let later_sequence = conflict.later_sequence();
        let MergeConflict {
            side,
            package,
            platforms,
            first,
            second,
            reason,
        } = conflict;

        match reason.duplicate_pin_kind() {
            Some(kind) => DuoError::DuplicateBuildOrSpecialPin {
                package,
                manager: side.to_string(),
                kind: kind.to_string(),
                first: first.spec_display(),
                first_origin: first.origin.to_string(),
                second: second.spec_display(),
                second_origin: second.origin.to_string(),
                platforms: platforms.to_string(),
                later_sequence,
            },
            None => DuoError::VersionConflict {
                package,
                manager: side.to_string(),
                first: first.spec_display(),
                first_origin: first.origin.to_string(),
                second: second.spec_display(),
                second_origin: second.origin.to_string(),
                platforms: platforms.to_string(),
                reason: reason.to_string(),
                later_sequence,
            },
        }
    }
}

fn dialect(side: Side) -> Dialect {
    match side {
        Side::Conda => Dialect::Conda,
        Side::Pip => Dialect::Pip,
    }
}

pub(crate) fn base_name(name: &str) -> &str {
    name.split('[').next().unwrap_or(name)
}

/// Merge normalized records over `targets`, or report the first conflict
///
/// `authoritative` holds manager-specific names whose constraint was
/// overwritten; their groups are never combined.
pub fn try_merge(
    records: &[CanonicalDependency],
    targets: PlatformSet,
    authoritative: &BTreeSet<String>,
) -> Result<MergedSet, MergeConflict> {
    let mut ordered: Vec<&CanonicalDependency> = records.iter().collect();
    ordered.sort_by_key(|record| record.origin.sequence);

    let conda = resolve_side(&ordered, Side::Conda, targets, authoritative, |_, _, _| false)?;

    // Whether conda's resolution of a package is pinned, per platform
    let mut conda_pins: HashMap<(&str, Platform), bool> = HashMap::new();
    for record in &conda {
        for platform in record.platforms.iter() {
            let pinned = conda_pins
                .entry((base_name(&record.package_name), platform))
                .or_insert(false);
            *pinned |= record.constraint.is_pinned();
        }
    }

    // Conda keeps the package unless only the pip side carries a pin
    let pip = resolve_side(&ordered, Side::Pip, targets, authoritative, |name, platform, constraint| {
        conda_pins
            .get(&(base_name(name), platform))
            .is_some_and(|&conda_pinned| conda_pinned || !constraint.is_pinned())
    })?;

    Ok(MergedSet {
        targets,
        conda,
        pip,
    })
}

/// Resolve every group of one manager
fn resolve_side(
    ordered: &[&CanonicalDependency],
    side: Side,
    targets: PlatformSet,
    authoritative: &BTreeSet<String>,
    also_conda: impl Fn(&str, Platform, &VersionConstraint) -> bool,
) -> Result<Vec<ResolvedRecord>, MergeConflict> {
    let mut resolved = Vec::new();
    for (name, group) in group_by_name(ordered, side) {
        let resolver = GroupResolver {
            side,
            name,
            group: &group,
            authoritative: authoritative.contains(name),
        };
        resolved.extend(resolver.resolve(targets, |platform, constraint| {
            also_conda(name, platform, constraint)
        })?);
    }
    Ok(resolved)
}

/// Merge normalized records over `targets`
pub fn merge(
    records: &[CanonicalDependency],
    targets: PlatformSet,
    authoritative: &BTreeSet<String>,
) -> ResolverResult<MergedSet> {
    try_merge(records, targets, authoritative).map_err(DuoError::from)
}

/// Records per manager-specific name, groups in first-seen order
fn group_by_name<'a>(
    ordered: &[&'a CanonicalDependency],
    side: Side,
) -> IndexMap<&'a str, Vec<&'a CanonicalDependency>> {
    let mut groups: IndexMap<&str, Vec<&CanonicalDependency>> = IndexMap::new();
    for &record in ordered {
        if let Some(name) = record.name_for(side) {
            groups.entry(name).or_default().push(record);
        }
    }
    groups
}

/// Winner on one platform
struct Resolution {
    constraint: VersionConstraint,
    also_conda: bool,
    origin: Origin,
}

struct GroupResolver<'a> {
    side: Side,
    name: &'a str,
    /// Sorted by origin sequence
    group: &'a [&'a CanonicalDependency],
    authoritative: bool,
}

impl<'a> GroupResolver<'a> {
    fn resolve(
        &self,
        targets: PlatformSet,
        also_conda: impl Fn(Platform, &VersionConstraint) -> bool,
    ) -> Result<Vec<ResolvedRecord>, MergeConflict> {
        let mut records: Vec<ResolvedRecord> = Vec::new();

        for platform in targets.iter() {
            let mut active: Vec<&CanonicalDependency> = self
                .group
                .iter()
                .copied()
                .filter(|record| record.platforms.contains(platform))
                .collect();
            if active.is_empty() {
                continue;
            }
            active.sort_by_key(|record| (record.specificity(), record.origin.sequence));

            let constraint = self.resolve_platform(&active)?;
            let resolution = Resolution {
                also_conda: also_conda(platform, &constraint),
                constraint,
                origin: active
                    .iter()
                    .map(|record| &record.origin)
                    .min_by_key(|origin| origin.sequence)
                    .cloned()
                    .unwrap_or_else(|| active[0].origin.clone()),
            };
            self.aggregate(&mut records, platform, resolution, active[0]);
        }

        Ok(records)
    }

    /// Minimal Scope Selection over records sorted by (specificity, sequence)
    fn resolve_platform(
        &self,
        active: &[&CanonicalDependency],
    ) -> Result<VersionConstraint, MergeConflict> {
        let dialect = dialect(self.side);
        if self.authoritative {
            return Ok(active[0].constraint.project(dialect));
        }

        let mut result: Option<VersionConstraint> = None;
        let mut start = 0;
        while start < active.len() {
            let specificity = active[start].specificity();
            let end = active[start..]
                .iter()
                .position(|record| record.specificity() != specificity)
                .map_or(active.len(), |offset| start + offset);
            let folded = self.fold_tier(&active[start..end], dialect)?;
            start = end;
            result = Some(match result {
                None => folded,
                Some(narrower) => match narrower.combine(&folded) {
                    Ok(combined) => combined,
                    Err(reason) => {
                        debug!(
                            "{} `{}`: keeping narrower `{}` over `{}` ({})",
                            self.side,
                            self.name,
                            narrower.describe(),
                            folded.describe(),
                            reason
                        );
                        narrower
                    },
                },
            });
        }

        Ok(result.unwrap_or_default())
    }

    /// Combine records of equal specificity; any failure is intractable
    fn fold_tier(
        &self,
        tier: &[&CanonicalDependency],
        dialect: Dialect,
    ) -> Result<VersionConstraint, MergeConflict> {
        let mut acc = tier[0].constraint.project(dialect);
        for (position, record) in tier.iter().enumerate().skip(1) {
            let constraint = record.constraint.project(dialect);
            acc = match acc.combine(&constraint) {
                Ok(combined) => combined,
                Err(aggregate) => {
                    // Blame the earliest declaration this one contradicts
                    let (first, reason) = tier[..position]
                        .iter()
                        .find_map(|earlier| {
                            earlier
                                .constraint
                                .project(dialect)
                                .combine(&constraint)
                                .err()
                                .map(|reason| (*earlier, reason))
                        })
                        .unwrap_or((tier[0], aggregate));
                    return Err(MergeConflict {
                        side: self.side,
                        package: self.name.to_string(),
                        platforms: first.platforms.intersection(&record.platforms),
                        first: first.clone(),
                        second: (*record).clone(),
                        reason,
                    });
                },
            };
        }
        Ok(acc)
    }

    /// Fold one platform's resolution into the group's records
    fn aggregate(
        &self,
        records: &mut Vec<ResolvedRecord>,
        platform: Platform,
        resolution: Resolution,
        representative: &CanonicalDependency,
    ) {
        if let Some(existing) = records.iter_mut().find(|record| {
            record.constraint == resolution.constraint && record.also_conda == resolution.also_conda
        }) {
            existing.platforms.insert(platform);
            if resolution.origin.sequence < existing.origin.sequence {
                existing.origin = resolution.origin;
            }
            return;
        }

        records.push(ResolvedRecord {
            side: self.side,
            name: self.name.to_string(),
            package_name: representative.package_name.clone(),
            constraint: resolution.constraint,
            platforms: PlatformSet::single(platform),
            origin: resolution.origin,
            also_conda: resolution.also_conda,
        });
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use duodep_core::{Origin, RawEntry};
    use proptest::prelude::*;

    use crate::normalize::normalize_entries;

    fn entry_text() -> impl Strategy<Value = String> {
        let name = prop::sample::select(vec!["foo", "bar"]);
        let spec = prop::sample::select(vec!["", " >=1", " <5", " >2", " !=3", " >=1,<4"]);
        let selector = prop::sample::select(vec!["", ":linux64", ":osx", ":unix", ":win"]);
        (name, spec, selector).prop_map(|(n, s, sel)| format!("{}{}{}", n, s, sel))
    }

    fn to_records(texts: &[String]) -> Vec<CanonicalDependency> {
        let entries: Vec<RawEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| RawEntry::bare(text.clone(), Origin::new("p.yaml", i)))
            .collect();
        normalize_entries(&entries, PlatformSet::all()).unwrap()
    }

    // Property 4: Idempotence
    proptest! {
        #[test]
        fn merge_is_deterministic(texts in prop::collection::vec(entry_text(), 1..8)) {
            let records = to_records(&texts);
            let first = try_merge(&records, PlatformSet::all(), &BTreeSet::new());
            let second = try_merge(&records, PlatformSet::all(), &BTreeSet::new());
            prop_assert_eq!(first, second);
        }
    }

    // Property 5: Platform partition
    proptest! {
        #[test]
        fn output_partitions_declared_platforms(texts in prop::collection::vec(entry_text(), 1..8)) {
            let records = to_records(&texts);
            if let Ok(merged) = try_merge(&records, PlatformSet::all(), &BTreeSet::new()) {
                for side in [Side::Conda, Side::Pip] {
                    for name in ["foo", "bar"] {
                        let declared = records
                            .iter()
                            .filter(|r| r.name_for(side) == Some(name))
                            .fold(PlatformSet::empty(), |acc, r| acc.union(&r.platforms));
                        let emitted: Vec<_> = merged
                            .records(side)
                            .iter()
                            .filter(|r| r.name == name)
                            .collect();
                        let mut union = PlatformSet::empty();
                        for record in &emitted {
                            prop_assert!(union.intersection(&record.platforms).is_empty());
                            union = union.union(&record.platforms);
                        }
                        prop_assert_eq!(union, declared);
                    }
                }
            }
        }
    }

    // Property 6: Input order within one scope does not change the result
    proptest! {
        #[test]
        fn same_scope_order_is_irrelevant(
            specs in prop::collection::vec(prop::sample::select(vec!["", ">=1", "<5", ">2", "!=3", "<=4"]), 1..5)
        ) {
            let forward: Vec<String> = specs.iter().map(|s| format!("foo {}", s)).collect();
            let backward: Vec<String> = forward.iter().rev().cloned().collect();
            let a = try_merge(&to_records(&forward), PlatformSet::all(), &BTreeSet::new());
            let b = try_merge(&to_records(&backward), PlatformSet::all(), &BTreeSet::new());
            match (a, b) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(&a.conda[0].constraint, &b.conda[0].constraint);
                },
                (Err(_), Err(_)) => {},
                (a, b) => prop_assert!(false, "order changed the outcome: {:?} vs {:?}", a.is_ok(), b.is_ok()),
            }
        }
    }
}
