//! Version constraints and their combination.
//!
//! A constraint is an interval over [`Version`]s (lower bound, upper bound,
//! exact pin, exclusions) plus at most one conda build-string pin and at most
//! one special pin (VCS ref, URL or local path). Combining two constraints is
//! interval intersection, so it is commutative and associative, and it fails
//! only when the intersection is empty or two pins of the same kind disagree.
//!
//! Accepted syntax:
//! - comparators: `=`, `==`, `!=`, `>`, `>=`, `<`, `<=`, `~=`, comma separated
//! - wildcard exact pins: `=1.2.*` / `==1.2.*`
//! - a bare version, meaning exact (`1.2.3`)
//! - conda build pins: `* cuda*`, `>=1.2 py39*`, `=1.2.3=py39_0`
//! - special pins: `@ git+https://...`, `@ file:///...`, `@ https://...`

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::version::Version;
use crate::error::{DuoError, DuoResult};

/// One side of an interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// An interval of versions with point exclusions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    lower: Option<Bound>,
    upper: Option<Bound>,
    exact: Option<Version>,
    excluded: Vec<Version>,
}

/// Kind of a special (non-version) pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    Vcs,
    LocalPath,
    Url,
}

/// A pin that names a source location instead of a version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecialPin {
    pub kind: SpecialKind,
    pub locator: String,
}

/// Which variant a constraint primarily is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unpinned,
    Comparators,
    BuildPin,
    SpecialPin,
}

/// A structured version constraint for one package
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionConstraint {
    range: VersionRange,
    build: Option<String>,
    special: Option<SpecialPin>,
}

/// Why two constraints cannot be combined
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintConflict {
    #[error("multiple exact version pins: ={first} and ={second}")]
    MultipleExact { first: String, second: String },

    #[error("{0}")]
    Contradiction(String),

    #[error("build pins `{first}` and `{second}` differ")]
    DuplicateBuildPin { first: String, second: String },

    #[error("special pins `@ {first}` and `@ {second}` differ")]
    DuplicateSpecialPin { first: String, second: String },
}

impl ConstraintConflict {
    /// Name of the pin kind for duplicate-pin conflicts
    pub fn duplicate_pin_kind(&self) -> Option<&'static str> {
        match self {
            ConstraintConflict::DuplicateBuildPin { .. } => Some("build"),
            ConstraintConflict::DuplicateSpecialPin { .. } => Some("special"),
            _ => None,
        }
    }
}

/// Rendering dialect for comparators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Conda,
    Pip,
}

impl Bound {
    fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }

    fn admits_above(&self, version: &Version) -> bool {
        if self.inclusive {
            version >= &self.version
        } else {
            version > &self.version
        }
    }

    fn admits_below(&self, version: &Version) -> bool {
        if self.inclusive {
            version <= &self.version
        } else {
            version < &self.version
        }
    }
}

/// Deterministic choice between two equal versions with different spellings
fn pick_spelling(a: &Version, b: &Version) -> Version {
    if a.to_string() <= b.to_string() {
        a.clone()
    } else {
        b.clone()
    }
}

fn tighter_lower(a: &Option<Bound>, b: &Option<Bound>) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => Some(match x.version.cmp(&y.version) {
            Ordering::Greater => x.clone(),
            Ordering::Less => y.clone(),
            Ordering::Equal => Bound {
                version: pick_spelling(&x.version, &y.version),
                inclusive: x.inclusive && y.inclusive,
            },
        }),
    }
}

fn tighter_upper(a: &Option<Bound>, b: &Option<Bound>) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => Some(match x.version.cmp(&y.version) {
            Ordering::Less => x.clone(),
            Ordering::Greater => y.clone(),
            Ordering::Equal => Bound {
                version: pick_spelling(&x.version, &y.version),
                inclusive: x.inclusive && y.inclusive,
            },
        }),
    }
}

impl VersionRange {
    /// The range admitting every version
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none()
            && self.upper.is_none()
            && self.exact.is_none()
            && self.excluded.is_empty()
    }

    pub fn lower(&self) -> Option<&Bound> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Bound> {
        self.upper.as_ref()
    }

    pub fn exact(&self) -> Option<&Version> {
        self.exact.as_ref()
    }

    pub fn excluded(&self) -> &[Version] {
        &self.excluded
    }

    /// Check whether a version lies in the range
    pub fn contains(&self, version: &Version) -> bool {
        if let Some(ref exact) = self.exact {
            return exact == version;
        }
        self.lower.as_ref().map_or(true, |b| b.admits_above(version))
            && self.upper.as_ref().map_or(true, |b| b.admits_below(version))
            && !self.excluded.contains(version)
    }

    /// Intersect two ranges, failing when the result is empty
    pub fn intersect(&self, other: &VersionRange) -> Result<VersionRange, ConstraintConflict> {
        let exact = match (&self.exact, &other.exact) {
            (Some(x), Some(y)) if x != y => {
                let (first, second) = if x < y { (x, y) } else { (y, x) };
                return Err(ConstraintConflict::MultipleExact {
                    first: first.to_string(),
                    second: second.to_string(),
                });
            },
            (Some(x), Some(y)) => Some(pick_spelling(x, y)),
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (None, None) => None,
        };

        let mut excluded = self.excluded.clone();
        excluded.extend(other.excluded.iter().cloned());

        VersionRange {
            lower: tighter_lower(&self.lower, &other.lower),
            upper: tighter_upper(&self.upper, &other.upper),
            exact,
            excluded,
        }
        .normalize()
    }

    /// Bring the range into canonical form or report that it is empty
    fn normalize(mut self) -> Result<VersionRange, ConstraintConflict> {
        self.excluded.sort_by(|a, b| a.cmp(b).then_with(|| a.to_string().cmp(&b.to_string())));
        self.excluded.dedup_by(|a, b| a == b);

        // `>=1,<=1` admits exactly one version
        if self.exact.is_none() {
            if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
                if lower.inclusive && upper.inclusive && lower.version == upper.version {
                    self.exact = Some(lower.version.clone());
                }
            }
        }

        if let Some(exact) = self.exact.take() {
            if let Some(ref lower) = self.lower {
                if !lower.admits_above(&exact) {
                    return Err(ConstraintConflict::Contradiction(format!(
                        "={} is below {}",
                        exact,
                        render_lower(lower)
                    )));
                }
            }
            if let Some(ref upper) = self.upper {
                if !upper.admits_below(&exact) {
                    return Err(ConstraintConflict::Contradiction(format!(
                        "={} is above {}",
                        exact,
                        render_upper(upper)
                    )));
                }
            }
            if self.excluded.contains(&exact) {
                return Err(ConstraintConflict::Contradiction(format!(
                    "={} is excluded by !={}",
                    exact, exact
                )));
            }
            // Inclusive bounds at the pinned version share its spelling
            let exact = [&self.lower, &self.upper]
                .into_iter()
                .flatten()
                .filter(|bound| bound.inclusive && bound.version == exact)
                .fold(exact.clone(), |acc, bound| pick_spelling(&acc, &bound.version));
            return Ok(VersionRange {
                exact: Some(exact),
                ..VersionRange::default()
            });
        }

        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            let empty = match lower.version.cmp(&upper.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lower.inclusive && upper.inclusive),
                Ordering::Less => false,
            };
            if empty {
                return Err(ConstraintConflict::Contradiction(format!(
                    "{} and {} leave no version",
                    render_lower(lower),
                    render_upper(upper)
                )));
            }
        }

        let (lower, upper) = (self.lower.clone(), self.upper.clone());
        self.excluded.retain(|v| {
            lower.as_ref().map_or(true, |b| b.admits_above(v))
                && upper.as_ref().map_or(true, |b| b.admits_below(v))
        });

        Ok(self)
    }

    /// Render as a comma-separated comparator list in canonical order
    pub fn render(&self, dialect: Dialect) -> String {
        if let Some(ref exact) = self.exact {
            return match dialect {
                Dialect::Conda => format!("={}", exact),
                Dialect::Pip => format!("=={}", exact),
            };
        }
        let mut clauses = Vec::new();
        if let Some(ref lower) = self.lower {
            clauses.push(render_lower(lower));
        }
        if let Some(ref upper) = self.upper {
            clauses.push(render_upper(upper));
        }
        clauses.extend(self.excluded.iter().map(|v| format!("!={}", v)));
        clauses.join(",")
    }

    /// Parse a comma separated comparator list
    fn parse_clauses(text: &str) -> DuoResult<VersionRange> {
        let mut range = VersionRange::unbounded();
        for clause in text.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                return Err(DuoError::invalid_spec(text, "empty comparator clause"));
            }
            let single = parse_clause(clause)?;
            range = range
                .intersect(&single)
                .map_err(|conflict| DuoError::invalid_spec(text, conflict.to_string()))?;
        }
        Ok(range)
    }
}

fn render_lower(bound: &Bound) -> String {
    let op = if bound.inclusive { ">=" } else { ">" };
    format!("{}{}", op, bound.version)
}

fn render_upper(bound: &Bound) -> String {
    let op = if bound.inclusive { "<=" } else { "<" };
    format!("{}{}", op, bound.version)
}

fn parse_version(clause: &str, text: &str) -> DuoResult<Version> {
    Version::from_str(text).map_err(|e| DuoError::invalid_spec(clause, e.to_string()))
}

/// `1.2.*` as the half-open interval [1.2, 1.3)
fn wildcard_range(clause: &str, prefix: &str) -> DuoResult<VersionRange> {
    let base = parse_version(clause, prefix)?;
    if base.is_prerelease() || base.post.is_some() || base.local.is_some() {
        return Err(DuoError::invalid_spec(clause, "wildcards only apply to release segments"));
    }
    let upper = base.bump_prefix(base.release.len());
    Ok(VersionRange {
        lower: Some(Bound::inclusive(base)),
        upper: Some(Bound::exclusive(upper)),
        ..VersionRange::default()
    })
}

fn parse_clause(clause: &str) -> DuoResult<VersionRange> {
    if clause.starts_with("===") {
        return Err(DuoError::invalid_spec(clause, "arbitrary equality (===) is not supported"));
    }

    let (op, rest) = ["~=", "==", "!=", "<=", ">=", "<", ">", "="]
        .iter()
        .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("", clause));

    if rest.is_empty() {
        return Err(DuoError::invalid_spec(clause, "missing version"));
    }

    if let Some(prefix) = rest.strip_suffix(".*") {
        return match op {
            "" | "=" | "==" => wildcard_range(clause, prefix),
            _ => Err(DuoError::invalid_spec(
                clause,
                format!("wildcards are not allowed with `{}`", op),
            )),
        };
    }

    let version = parse_version(clause, rest)?;
    let range = match op {
        "" | "=" | "==" => VersionRange {
            exact: Some(version),
            ..VersionRange::default()
        },
        "!=" => VersionRange {
            excluded: vec![version],
            ..VersionRange::default()
        },
        ">" => VersionRange {
            lower: Some(Bound::exclusive(version)),
            ..VersionRange::default()
        },
        ">=" => VersionRange {
            lower: Some(Bound::inclusive(version)),
            ..VersionRange::default()
        },
        "<" => VersionRange {
            upper: Some(Bound::exclusive(version)),
            ..VersionRange::default()
        },
        "<=" => VersionRange {
            upper: Some(Bound::inclusive(version)),
            ..VersionRange::default()
        },
        "~=" => {
            if version.release.len() < 2 {
                return Err(DuoError::invalid_spec(
                    clause,
                    "`~=` needs at least two release segments",
                ));
            }
            let upper = version.bump_prefix(version.release.len() - 1);
            VersionRange {
                lower: Some(Bound::inclusive(version)),
                upper: Some(Bound::exclusive(upper)),
                ..VersionRange::default()
            }
        },
        _ => return Err(DuoError::invalid_spec(clause, "unknown operator")),
    };
    Ok(range)
}

/// Remove whitespace that separates an operator from its version or
/// surrounds a comma, keeping single spaces between match-spec fields
fn collapse_whitespace(text: &str) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            let next = chars[i..].iter().find(|c| !c.is_whitespace()).copied();
            let prev = out.chars().last();
            let glue = matches!(prev, Some(',' | '<' | '>' | '=' | '!' | '~')) || next == Some(',');
            if !glue {
                out.push(' ');
            }
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn classify_locator(locator: &str) -> SpecialKind {
    const VCS: [&str; 4] = ["git+", "hg+", "svn+", "bzr+"];
    if VCS.iter().any(|prefix| locator.starts_with(prefix)) {
        SpecialKind::Vcs
    } else if locator.starts_with("file:")
        || locator.starts_with('.')
        || locator.starts_with('/')
        || locator.starts_with('~')
    {
        SpecialKind::LocalPath
    } else {
        SpecialKind::Url
    }
}

impl VersionConstraint {
    /// The constraint admitting everything
    pub fn unpinned() -> Self {
        Self::default()
    }

    /// Parse a version spec string
    pub fn parse(spec: &str) -> DuoResult<Self> {
        let text = spec.trim();
        if text.is_empty() {
            return Ok(Self::unpinned());
        }

        if let Some(locator) = text.strip_prefix('@') {
            let locator = locator.trim();
            if locator.is_empty() || locator.contains(char::is_whitespace) {
                return Err(DuoError::invalid_spec(spec, "expected a single locator after `@`"));
            }
            return Ok(Self {
                special: Some(SpecialPin {
                    kind: classify_locator(locator),
                    locator: locator.to_string(),
                }),
                ..Self::default()
            });
        }

        let collapsed = collapse_whitespace(text);
        let fields: Vec<&str> = collapsed.split(' ').collect();
        let (version_part, build) = match fields.as_slice() {
            // conda `=1.2.3=py39_0`
            [single]
                if single.starts_with('=')
                    && !single.starts_with("==")
                    && !single.contains(',')
                    && single[1..].contains('=') =>
            {
                match single[1..].split_once('=') {
                    Some((version, build)) => (format!("={}", version), Some(build.to_string())),
                    None => (single.to_string(), None),
                }
            },
            [single] => (single.to_string(), None),
            [version, build] => (version.to_string(), Some(build.to_string())),
            _ => return Err(DuoError::invalid_spec(spec, "too many fields")),
        };

        if let Some(ref build) = build {
            if build.is_empty()
                || build.starts_with(['<', '>', '=', '!', '~', '@'])
                || build.contains(',')
            {
                return Err(DuoError::invalid_spec(spec, format!("invalid build string `{}`", build)));
            }
        }

        let range = if version_part == "*" {
            if build.is_none() {
                return Err(DuoError::invalid_spec(spec, "`*` needs a build string"));
            }
            VersionRange::unbounded()
        } else {
            VersionRange::parse_clauses(&version_part)?
        };

        Ok(Self {
            range,
            build,
            special: None,
        })
    }

    pub fn kind(&self) -> ConstraintKind {
        if self.special.is_some() {
            ConstraintKind::SpecialPin
        } else if self.build.is_some() {
            ConstraintKind::BuildPin
        } else if !self.range.is_unbounded() {
            ConstraintKind::Comparators
        } else {
            ConstraintKind::Unpinned
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.kind() != ConstraintKind::Unpinned
    }

    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    pub fn special(&self) -> Option<&SpecialPin> {
        self.special.as_ref()
    }

    /// The parts one package manager understands: conda ignores special
    /// pins, pip ignores build pins
    pub fn project(&self, dialect: Dialect) -> VersionConstraint {
        match dialect {
            Dialect::Conda => VersionConstraint {
                special: None,
                ..self.clone()
            },
            Dialect::Pip => VersionConstraint {
                build: None,
                ..self.clone()
            },
        }
    }

    /// Check whether a concrete version satisfies the comparator part
    pub fn allows(&self, version: &Version) -> bool {
        self.range.contains(version)
    }

    /// Combine two constraints for the same package
    pub fn combine(&self, other: &VersionConstraint) -> Result<VersionConstraint, ConstraintConflict> {
        let range = self.range.intersect(&other.range)?;

        let build = match (&self.build, &other.build) {
            (Some(a), Some(b)) if a != b => {
                let (first, second) = if a < b { (a, b) } else { (b, a) };
                return Err(ConstraintConflict::DuplicateBuildPin {
                    first: first.clone(),
                    second: second.clone(),
                });
            },
            (Some(a), _) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        let special = match (&self.special, &other.special) {
            (Some(a), Some(b)) if a != b => {
                let (first, second) = if a.locator < b.locator { (a, b) } else { (b, a) };
                return Err(ConstraintConflict::DuplicateSpecialPin {
                    first: first.locator.clone(),
                    second: second.locator.clone(),
                });
            },
            (Some(a), _) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        Ok(VersionConstraint {
            range,
            build,
            special,
        })
    }

    /// Conda match-spec suffix (`>=1,<2`, `* cuda*`), or `None` when unpinned
    pub fn conda_spec(&self) -> Option<String> {
        let range = self.range.render(Dialect::Conda);
        match (&self.build, range.is_empty()) {
            (Some(build), true) => Some(format!("* {}", build)),
            (Some(build), false) => Some(format!("{} {}", range, build)),
            (None, true) => None,
            (None, false) => Some(range),
        }
    }

    /// PEP 508 suffix (`>=1,<2`, `@ git+...`), or `None` when unpinned
    pub fn pip_spec(&self) -> Option<String> {
        if let Some(ref special) = self.special {
            return Some(format!("@ {}", special.locator));
        }
        let range = self.range.render(Dialect::Pip);
        (!range.is_empty()).then_some(range)
    }

    /// Human readable form used in diagnostics
    pub fn describe(&self) -> String {
        let text = self.to_string();
        if text.is_empty() {
            "(unpinned)".to_string()
        } else {
            text
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(conda) = self.conda_spec() {
            parts.push(conda);
        }
        if let Some(ref special) = self.special {
            parts.push(format!("@ {}", special.locator));
        }
        f.write_str(&parts.join(" "))
    }
}

impl FromStr for VersionConstraint {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
