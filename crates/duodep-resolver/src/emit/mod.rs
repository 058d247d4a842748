//! Output of a merge and its renderings
//!
//! [`MergeOutput`] holds the resolved records of both managers. From it the
//! per-platform dependency lists, pip requirements with PEP 508 markers and
//! the environment file model are derived.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use duodep_core::types::LocalPackage;
use duodep_core::{DuoError, Platform, PlatformSet, Side, VersionConstraint};

use crate::merge::{base_name, ResolvedRecord};
use crate::overrides::OverrideReport;
use crate::policy::ConflictWarning;

/// Everything a merge produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeOutput {
    pub targets: PlatformSet,
    /// Name of the first root document, if it has one
    pub name: Option<String>,
    pub conda: Vec<ResolvedRecord>,
    pub pip: Vec<ResolvedRecord>,
    pub channels: Vec<String>,
    pub pip_indices: Vec<String>,
    pub local_packages: Vec<LocalPackage>,
    pub overrides: OverrideReport,
    pub warnings: Vec<ConflictWarning>,
}

/// Dependency lists for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformView {
    pub platform: Platform,
    pub conda: Vec<String>,
    pub pip: Vec<String>,
}

impl MergeOutput {
    pub fn records(&self, side: Side) -> &[ResolvedRecord] {
        match side {
            Side::Conda => &self.conda,
            Side::Pip => &self.pip,
        }
    }

    /// Requirement strings of one manager on one platform
    pub fn requirements(&self, side: Side, platform: Platform) -> Vec<String> {
        let mut seen = Vec::new();
        for record in self.records(side) {
            if record.platforms.contains(platform) {
                let requirement = record.requirement();
                if !seen.contains(&requirement) {
                    seen.push(requirement);
                }
            }
        }
        seen
    }

    /// Both lists for one platform
    pub fn for_platform(&self, platform: Platform) -> PlatformView {
        PlatformView {
            platform,
            conda: self.requirements(Side::Conda, platform),
            pip: self.requirements(Side::Pip, platform),
        }
    }

    /// Every pip record as a requirement with an environment marker
    pub fn pip_requirements(&self) -> Vec<String> {
        self.pip
            .iter()
            .map(|record| with_marker(record, self.targets))
            .collect()
    }

    /// Pip records the environment file lists under `pip:`
    pub fn pip_only(&self) -> impl Iterator<Item = &ResolvedRecord> {
        self.pip.iter().filter(|record| !record.also_conda)
    }

    /// Names of packages whose pins were overridden
    pub fn overridden(&self) -> Vec<&str> {
        self.overrides
            .applied
            .iter()
            .map(|applied| applied.package.as_str())
            .collect()
    }

    /// Conda records for the environment file
    ///
    /// An unpinned conda record gives way on the platforms where the pip
    /// side of the same package carries a pin.
    fn environment_conda(&self) -> Vec<ResolvedRecord> {
        let mut pip_pinned: IndexMap<&str, PlatformSet> = IndexMap::new();
        for record in self.pip_only().filter(|record| record.constraint.is_pinned()) {
            let platforms = pip_pinned.entry(base_name(&record.package_name)).or_default();
            *platforms = platforms.union(&record.platforms);
        }

        self.conda
            .iter()
            .filter_map(|record| {
                let mut record = record.clone();
                if !record.constraint.is_pinned() {
                    if let Some(pinned) = pip_pinned.get(base_name(&record.package_name)) {
                        debug!("`{}` on [{}] is left to pip", record.name, pinned);
                        record.platforms = record.platforms.difference(pinned);
                    }
                }
                (!record.platforms.is_empty()).then_some(record)
            })
            .collect()
    }

    /// Build the environment file model
    pub fn environment(&self, name: Option<String>, style: SelectorStyle) -> EnvironmentSpec {
        let env_conda = self.environment_conda();
        let mut groups: IndexMap<&str, Vec<&ResolvedRecord>> = IndexMap::new();
        for record in &env_conda {
            groups.entry(record.name.as_str()).or_default().push(record);
        }

        let mut conda = Vec::new();
        for (name, records) in groups {
            if records.len() == 1 && records[0].platforms == self.targets {
                conda.push(CondaLine {
                    requirement: records[0].requirement(),
                    selector: None,
                });
                continue;
            }
            match style {
                SelectorStyle::Comment => {
                    for platform in self.targets.iter() {
                        if let Some(record) = records.iter().find(|r| r.platforms.contains(platform)) {
                            conda.push(CondaLine {
                                requirement: record.requirement(),
                                selector: Some(EnvSelector::Platform(platform)),
                            });
                        }
                    }
                },
                SelectorStyle::Sel => conda.extend(self.collapse_families(name, &records)),
            }
        }

        let pip = self
            .pip_only()
            .map(|record| with_marker(record, self.targets))
            .collect();

        EnvironmentSpec {
            name: name.or_else(|| self.name.clone()),
            channels: self.channels.clone(),
            conda,
            pip,
            platforms: self.targets.iter().collect(),
        }
    }

    /// One `sel(family)` line per family the package is present on
    fn collapse_families(&self, name: &str, records: &[&ResolvedRecord]) -> Vec<CondaLine> {
        let mut families: IndexMap<&'static str, Vec<(Platform, &ResolvedRecord)>> = IndexMap::new();
        for platform in self.targets.iter() {
            if let Some(record) = records.iter().find(|r| r.platforms.contains(platform)) {
                families.entry(platform.family()).or_default().push((platform, record));
            }
        }

        let mut lines = Vec::new();
        for (family, members) in families {
            let covered: PlatformSet = members.iter().map(|(p, _)| *p).collect();
            let in_family: PlatformSet = self.targets.iter().filter(|p| p.family() == family).collect();
            if covered != in_family {
                debug!("`{}` widened from [{}] to sel({})", name, covered, family);
            }

            let first = members[0].1.constraint.clone();
            let constraint = members[1..]
                .iter()
                .try_fold(first.clone(), |acc, (_, record)| acc.combine(&record.constraint))
                .unwrap_or_else(|reason| {
                    warn!(
                        "Cannot collapse `{}` into sel({}): {}; keeping `{}`",
                        name,
                        family,
                        reason,
                        first.describe()
                    );
                    first
                });

            lines.push(CondaLine {
                requirement: conda_requirement(name, &constraint),
                selector: Some(EnvSelector::Family(family)),
            });
        }
        lines
    }
}

fn conda_requirement(name: &str, constraint: &VersionConstraint) -> String {
    match constraint.conda_spec() {
        Some(spec) => format!("{} {}", name, spec),
        None => name.to_string(),
    }
}

fn with_marker(record: &ResolvedRecord, targets: PlatformSet) -> String {
    let requirement = record.requirement();
    match pep508_marker(record.platforms, targets) {
        // A URL requirement needs whitespace before the marker separator
        Some(marker) if record.constraint.special().is_some() => {
            format!("{} ; {}", requirement, marker)
        },
        Some(marker) => format!("{}; {}", requirement, marker),
        None => requirement,
    }
}

/// PEP 508 marker selecting `platforms` among `targets`; `None` when the
/// record applies everywhere
pub fn pep508_marker(platforms: PlatformSet, targets: PlatformSet) -> Option<String> {
    let platforms = platforms.intersection(&targets);
    if platforms == targets || platforms.is_empty() {
        return None;
    }

    let family_set = |family: &str| -> PlatformSet {
        targets.iter().filter(|p| p.family() == family).collect()
    };
    let linux = family_set("linux");
    let osx = family_set("osx");
    let win = family_set("win");

    // Everything but windows
    if !win.is_empty() && platforms == targets.difference(&win) {
        return Some("sys_platform != 'win32'".to_string());
    }

    let mut terms = Vec::new();
    let mut remaining = platforms;
    for (family, marker) in [
        (linux, "sys_platform == 'linux'"),
        (osx, "sys_platform == 'darwin'"),
        (win, "sys_platform == 'win32'"),
    ] {
        if !family.is_empty() && family.is_subset(&platforms) {
            terms.push(marker.to_string());
            remaining = remaining.difference(&family);
        }
    }
    terms.extend(remaining.iter().map(|p| p.pep508_marker().to_string()));

    if terms.len() == 1 {
        return terms.pop();
    }
    Some(
        terms
            .iter()
            .map(|term| {
                if term.contains(" and ") {
                    format!("({})", term)
                } else {
                    term.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" or "),
    )
}

/// How platform-restricted conda entries are written to an environment file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorStyle {
    /// `{"sel(linux)": "foo >1"}`
    #[default]
    Sel,
    /// `foo >1  # [linux64]`
    Comment,
}

impl fmt::Display for SelectorStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorStyle::Sel => f.write_str("sel"),
            SelectorStyle::Comment => f.write_str("comment"),
        }
    }
}

impl FromStr for SelectorStyle {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sel" => Ok(SelectorStyle::Sel),
            "comment" => Ok(SelectorStyle::Comment),
            other => Err(DuoError::ConfigValidation {
                field: "selector_style".to_string(),
                reason: format!("expected `sel` or `comment`, got `{}`", other),
            }),
        }
    }
}

/// Platform restriction of one environment file entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSelector {
    /// `sel(linux)`
    Family(&'static str),
    /// `# [linux64]`
    Platform(Platform),
}

impl fmt::Display for EnvSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvSelector::Family(family) => write!(f, "sel({})", family),
            EnvSelector::Platform(platform) => write!(f, "[{}]", platform.selector().as_str()),
        }
    }
}

/// One conda entry of an environment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaLine {
    pub requirement: String,
    pub selector: Option<EnvSelector>,
}

/// Contents of an `environment.yaml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: Option<String>,
    pub channels: Vec<String>,
    pub conda: Vec<CondaLine>,
    /// Pip requirements with markers, for packages conda does not install
    pub pip: Vec<String>,
    pub platforms: Vec<Platform>,
}
