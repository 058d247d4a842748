//! Dependency entry normalization.
//!
//! Turns each [`RawEntry`] into the canonical records the merge engine works
//! on: the requirement strings are split into name, spec and selector, the
//! selector is expanded to a platform set, and the manager affinity is fixed.

use duodep_core::types::{expand_all, looks_like_path, ConstraintKind};
use duodep_core::{
    CanonicalDependency, DuoError, EntryName, Manager, Origin, PlatformSet, RawEntry, Requirement,
    VersionConstraint,
};
use tracing::debug;

use crate::ResolverResult;

/// Normalize one entry against the merge's target platforms.
///
/// Returns an empty list when the entry's selector matches none of the
/// targets; the entry simply does not apply to this merge.
pub fn normalize_entry(
    entry: &RawEntry,
    targets: PlatformSet,
) -> ResolverResult<Vec<CanonicalDependency>> {
    let origin = &entry.origin;
    let records = match &entry.name {
        EntryName::Bare(text) => {
            let side = parse_side(text, entry, targets)?;
            vec![side.into_record(Manager::Both, origin)]
        },
        EntryName::ManagerQualified { conda, pip } => {
            let conda = conda
                .as_deref()
                .map(|text| parse_side(text, entry, targets))
                .transpose()?;
            let pip = pip
                .as_deref()
                .map(|text| parse_side(text, entry, targets))
                .transpose()?;

            match (conda, pip) {
                (None, None) => {
                    return Err(DuoError::malformed(
                        &origin.document,
                        &entry.display_text(),
                        "entry names neither a conda nor a pip package",
                    ))
                },
                (Some(conda), None) => vec![conda.into_record(Manager::CondaOnly, origin)],
                (None, Some(pip)) => vec![pip.into_record(Manager::PipOnly, origin)],
                (Some(conda), Some(pip)) => {
                    if conda.spec_text == pip.spec_text && conda.scope == pip.scope {
                        let mut record = pip.into_record(Manager::Both, origin);
                        record.conda_name = Some(conda_name_of(&conda.name));
                        vec![record]
                    } else {
                        debug!(
                            "Splitting {} into separate conda and pip records",
                            entry.display_text()
                        );
                        vec![
                            conda.into_record(Manager::CondaOnly, origin),
                            pip.into_record(Manager::PipOnly, origin),
                        ]
                    }
                },
            }
        },
    };

    Ok(records
        .into_iter()
        .filter(|record| {
            let keep = !record.platforms.is_empty();
            if !keep {
                debug!(
                    "Dropping {} from {}: selector matches no target platform",
                    record.package_name, origin
                );
            }
            keep
        })
        .collect())
}

/// Normalize every entry, preserving order
pub fn normalize_entries(
    entries: &[RawEntry],
    targets: PlatformSet,
) -> ResolverResult<Vec<CanonicalDependency>> {
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        records.extend(normalize_entry(entry, targets)?);
    }
    Ok(records)
}

/// One parsed manager side of an entry
struct ParsedSide {
    name: String,
    spec_text: String,
    constraint: VersionConstraint,
    selector: Option<String>,
    scope: PlatformSet,
    targets: PlatformSet,
}

impl ParsedSide {
    fn into_record(self, manager: Manager, origin: &Origin) -> CanonicalDependency {
        let conda_name = matches!(manager, Manager::CondaOnly | Manager::Both)
            .then(|| conda_name_of(&self.name));
        let pip_name = matches!(manager, Manager::PipOnly | Manager::Both).then(|| self.name.clone());
        CanonicalDependency {
            package_name: pip_name.clone().or_else(|| conda_name.clone()).unwrap_or_default(),
            manager,
            conda_name,
            pip_name,
            constraint: self.constraint,
            spec_text: self.spec_text,
            platforms: self.scope.intersection(&self.targets),
            scope: self.scope,
            selector: self.selector,
            origin: origin.clone(),
        }
    }
}

/// Conda has no extras; `black[jupyter]` installs `black`
fn conda_name_of(name: &str) -> String {
    name.split('[').next().unwrap_or(name).to_string()
}

fn parse_side(text: &str, entry: &RawEntry, targets: PlatformSet) -> ResolverResult<ParsedSide> {
    let origin = &entry.origin;
    let requirement = Requirement::parse(text, &origin.document)?;

    if looks_like_path(requirement.base_name()) {
        return Err(DuoError::malformed(
            &origin.document,
            text,
            "local paths belong in local_dependencies, not dependencies",
        ));
    }

    let selector = requirement.selector.clone().or_else(|| entry.selector.clone());
    let scope = match selector.as_deref() {
        Some(selector) => expand_all(selector).map_err(|err| match err {
            DuoError::UnknownSelector { selector, .. } => DuoError::UnknownSelector {
                selector,
                document: Some(origin.to_string()),
            },
            other => other,
        })?,
        None => PlatformSet::all(),
    };

    let spec_text = requirement.spec.clone().unwrap_or_default();
    let constraint = VersionConstraint::parse(&spec_text).map_err(|err| match err {
        DuoError::InvalidVersionSpec { spec, reason } => DuoError::InvalidVersionSpec {
            spec,
            reason: format!("{} ({}: {})", reason, origin, requirement.name),
        },
        other => other,
    })?;

    if constraint.kind() == ConstraintKind::SpecialPin {
        debug!("{} is pinned to a source location", requirement.name);
    }

    Ok(ParsedSide {
        name: requirement.name,
        spec_text,
        constraint,
        selector,
        scope,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use duodep_core::{Platform, Side};

    fn origin() -> Origin {
        Origin::new("requirements.yaml", 0)
    }

    fn normalize(entry: RawEntry) -> Vec<CanonicalDependency> {
        normalize_entry(&entry, PlatformSet::all()).unwrap()
    }

    #[test]
    fn test_bare_entry_is_both() {
        let records = normalize(RawEntry::bare("numpy >=1.20", origin()));
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.manager, Manager::Both);
        assert_eq!(record.package_name, "numpy");
        assert_eq!(record.name_for(Side::Conda), Some("numpy"));
        assert_eq!(record.name_for(Side::Pip), Some("numpy"));
        assert_eq!(record.constraint.to_string(), ">=1.20");
        assert_eq!(record.platforms, PlatformSet::all());
    }

    #[test]
    fn test_manager_qualified_single_side() {
        let records = normalize(RawEntry::qualified(Some("mumps"), None, origin()));
        assert_eq!(records[0].manager, Manager::CondaOnly);
        assert_eq!(records[0].name_for(Side::Pip), None);

        let records = normalize(RawEntry::qualified(None, Some("pyyaml"), origin()));
        assert_eq!(records[0].manager, Manager::PipOnly);
        assert_eq!(records[0].conda_name, None);
    }

    #[test]
    fn test_divergent_names_keep_both_identities() {
        let records = normalize(RawEntry::qualified(Some("pytables"), Some("tables"), origin()));
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.manager, Manager::Both);
        assert_eq!(record.package_name, "tables");
        assert_eq!(record.name_for(Side::Conda), Some("pytables"));
        assert_eq!(record.name_for(Side::Pip), Some("tables"));
    }

    #[test]
    fn test_divergent_specs_split_entry() {
        let records = normalize(RawEntry::qualified(Some("foo >1"), Some("foo <3"), origin()));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].manager, Manager::CondaOnly);
        assert_eq!(records[1].manager, Manager::PipOnly);
    }

    #[test]
    fn test_selector_restricts_platforms() {
        let records = normalize(RawEntry::bare("cuda-toolkit:linux64", origin()));
        assert_eq!(records[0].platforms, PlatformSet::single(Platform::Linux64));
        assert_eq!(records[0].specificity(), 1);

        let entry = RawEntry::bare("pywin32", origin()).with_selector("win");
        assert_eq!(normalize(entry)[0].platforms, PlatformSet::single(Platform::Win64));
    }

    #[test]
    fn test_selector_outside_targets_drops_entry() {
        let targets = PlatformSet::single(Platform::Linux64);
        let entry = RawEntry::bare("pywin32:win64", origin());
        assert!(normalize_entry(&entry, targets).unwrap().is_empty());
    }

    #[test]
    fn test_unrestricted_scope_ignores_targets() {
        let targets: PlatformSet = [Platform::Linux64, Platform::Osx64].into_iter().collect();
        let records = normalize_entry(&RawEntry::bare("numpy", origin()), targets).unwrap();
        assert_eq!(records[0].platforms, targets);
        assert_eq!(records[0].scope, PlatformSet::all());
        assert_eq!(records[0].specificity(), Platform::ALL.len());

        let single = PlatformSet::single(Platform::Linux64);
        let linux = normalize_entry(&RawEntry::bare("numpy:linux", origin()), single).unwrap();
        assert!(linux[0].specificity() < records[0].specificity());
    }

    #[test]
    fn test_errors() {
        let err = normalize_entry(&RawEntry::qualified(None, None, origin()), PlatformSet::all())
            .unwrap_err();
        assert!(matches!(err, DuoError::MalformedEntry { .. }));

        let err = normalize_entry(&RawEntry::bare("../lib", origin()), PlatformSet::all()).unwrap_err();
        assert!(matches!(err, DuoError::MalformedEntry { .. }));

        let err = normalize_entry(&RawEntry::bare("foo:bsd", origin()), PlatformSet::all()).unwrap_err();
        assert!(matches!(err, DuoError::UnknownSelector { ref document, .. } if document.is_some()));

        let err = normalize_entry(&RawEntry::bare("foo >=", origin()), PlatformSet::all()).unwrap_err();
        assert!(matches!(err, DuoError::InvalidVersionSpec { .. }));
    }

    #[test]
    fn test_extras_stripped_for_conda() {
        let records = normalize(RawEntry::bare("black[jupyter]", origin()));
        assert_eq!(records[0].name_for(Side::Conda), Some("black"));
        assert_eq!(records[0].name_for(Side::Pip), Some("black[jupyter]"));
    }
}
