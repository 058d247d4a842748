//! Dependency entry and record types.
//!
//! A [`RawEntry`] is one dependency line as authored in a document. The
//! normalizer turns it into one or two [`CanonicalDependency`] records, the
//! unit the merge engine works on.

use serde::Serialize;
use std::fmt;

use super::constraint::VersionConstraint;
use super::platform::PlatformSet;
use crate::error::{DuoError, DuoResult};

/// Which package manager(s) install a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Manager {
    CondaOnly,
    PipOnly,
    Both,
}

/// One of the two package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Conda,
    Pip,
}

impl Manager {
    pub fn covers(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (Manager::Both, _) | (Manager::CondaOnly, Side::Conda) | (Manager::PipOnly, Side::Pip)
        )
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Conda => f.write_str("conda"),
            Side::Pip => f.write_str("pip"),
        }
    }
}

/// Where an entry was declared
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Origin {
    /// Document identifier, usually its path
    pub document: String,
    /// Position of the entry inside its document
    pub index: usize,
    /// Stable position across all flattened documents; drives
    /// "first encountered" ordering
    pub sequence: usize,
}

impl Origin {
    pub fn new(document: impl Into<String>, index: usize) -> Self {
        Self {
            document: document.into(),
            index,
            sequence: index,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, entry {}", self.document, self.index + 1)
    }
}

/// Name part of an entry, decided once when the document is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryName {
    /// `numpy >=1.20` style string shared by both managers
    Bare(String),
    /// Per-manager requirement strings
    ManagerQualified {
        conda: Option<String>,
        pip: Option<String>,
    },
}

/// One dependency line as authored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub name: EntryName,
    /// Selector applying to the whole entry; a `:selector` suffix on a
    /// requirement string takes precedence
    pub selector: Option<String>,
    pub origin: Origin,
}

impl RawEntry {
    pub fn bare(text: impl Into<String>, origin: Origin) -> Self {
        Self {
            name: EntryName::Bare(text.into()),
            selector: None,
            origin,
        }
    }

    pub fn qualified(conda: Option<&str>, pip: Option<&str>, origin: Origin) -> Self {
        Self {
            name: EntryName::ManagerQualified {
                conda: conda.map(str::to_string),
                pip: pip.map(str::to_string),
            },
            selector: None,
            origin,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Source text used in diagnostics
    pub fn display_text(&self) -> String {
        match &self.name {
            EntryName::Bare(text) => text.clone(),
            EntryName::ManagerQualified { conda, pip } => {
                let mut parts = Vec::new();
                if let Some(conda) = conda {
                    parts.push(format!("conda: {}", conda));
                }
                if let Some(pip) = pip {
                    parts.push(format!("pip: {}", pip));
                }
                format!("{{{}}}", parts.join(", "))
            },
        }
    }
}

/// A requirement string split into name, version spec and selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Package name including any `[extras]`
    pub name: String,
    pub spec: Option<String>,
    pub selector: Option<String>,
}

impl Requirement {
    /// Parse `name[extras] <spec>:<selector>`
    pub fn parse(text: &str, document: &str) -> DuoResult<Self> {
        let trimmed = text.trim();
        let (body, selector) = split_selector(trimmed);

        let name_len = body
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')))
            .map_or(body.len(), |(i, _)| i);
        if name_len == 0 {
            return Err(DuoError::malformed(document, text, "missing package name"));
        }

        let mut name_end = name_len;
        if body[name_len..].starts_with('[') {
            match body[name_len..].find(']') {
                Some(close) => name_end = name_len + close + 1,
                None => return Err(DuoError::malformed(document, text, "unclosed extras bracket")),
            }
        }

        let spec = body[name_end..].trim();
        Ok(Self {
            name: body[..name_end].to_string(),
            spec: (!spec.is_empty()).then(|| spec.to_string()),
            selector: selector.map(str::to_string),
        })
    }

    /// Name without `[extras]`
    pub fn base_name(&self) -> &str {
        self.name.split('[').next().unwrap_or(&self.name)
    }
}

/// Split a trailing `:selector` off a requirement string. The suffix only
/// counts as a selector when it is plain words starting with a letter, so
/// URLs keep their colons and ports.
fn split_selector(text: &str) -> (&str, Option<&str>) {
    match text.rsplit_once(':') {
        Some((head, tail))
            if !tail.trim().is_empty()
                && tail.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ')
                && tail
                    .split_whitespace()
                    .all(|word| word.starts_with(|c: char| c.is_ascii_alphabetic())) =>
        {
            (head.trim_end(), Some(tail.trim()))
        },
        _ => (text, None),
    }
}

/// Check whether a dependency name is really a filesystem path
pub fn looks_like_path(name: &str) -> bool {
    name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) || name.starts_with('.')
}

/// A normalized dependency record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDependency {
    /// Reference name: the pip name if present, else the conda name
    pub package_name: String,
    pub manager: Manager,
    pub conda_name: Option<String>,
    pub pip_name: Option<String>,
    pub constraint: VersionConstraint,
    /// Version spec exactly as written
    pub spec_text: String,
    /// Platforms this record is active on
    pub platforms: PlatformSet,
    /// Platforms the entry was declared for; fixes its specificity
    pub scope: PlatformSet,
    pub selector: Option<String>,
    pub origin: Origin,
}

impl CanonicalDependency {
    /// Manager-specific name, if this record covers that side
    pub fn name_for(&self, side: Side) -> Option<&str> {
        if !self.manager.covers(side) {
            return None;
        }
        match side {
            Side::Conda => self.conda_name.as_deref(),
            Side::Pip => self.pip_name.as_deref(),
        }
    }

    /// Number of platforms in the declared scope; smaller is more specific
    pub fn specificity(&self) -> usize {
        self.scope.len()
    }

    /// Spec text for diagnostics
    pub fn spec_display(&self) -> String {
        if self.spec_text.is_empty() {
            "(unpinned)".to_string()
        } else {
            self.spec_text.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_plain_and_pinned() {
        let req = Requirement::parse("numpy", "doc").unwrap();
        assert_eq!(req.name, "numpy");
        assert_eq!(req.spec, None);
        assert_eq!(req.selector, None);

        let req = Requirement::parse("numpy>=1.20,<2", "doc").unwrap();
        assert_eq!(req.name, "numpy");
        assert_eq!(req.spec.as_deref(), Some(">=1.20,<2"));

        let req = Requirement::parse("pytorch * cuda*", "doc").unwrap();
        assert_eq!(req.spec.as_deref(), Some("* cuda*"));
    }

    #[test]
    fn test_requirement_with_selector_suffix() {
        let req = Requirement::parse("cuda-toolkit =11.8:linux64", "doc").unwrap();
        assert_eq!(req.name, "cuda-toolkit");
        assert_eq!(req.spec.as_deref(), Some("=11.8"));
        assert_eq!(req.selector.as_deref(), Some("linux64"));

        let req = Requirement::parse("pywin32:win64 win", "doc").unwrap();
        assert_eq!(req.selector.as_deref(), Some("win64 win"));
    }

    #[test]
    fn test_requirement_with_extras_and_url() {
        let req = Requirement::parse("black[jupyter] >=23", "doc").unwrap();
        assert_eq!(req.name, "black[jupyter]");
        assert_eq!(req.base_name(), "black");

        let req = Requirement::parse("adaptive @ git+https://github.com/python-adaptive/adaptive", "doc")
            .unwrap();
        assert_eq!(req.name, "adaptive");
        assert_eq!(
            req.spec.as_deref(),
            Some("@ git+https://github.com/python-adaptive/adaptive")
        );
        assert_eq!(req.selector, None);

        let req = Requirement::parse("foo @ https://host:8080", "doc").unwrap();
        assert_eq!(req.name, "foo");
        assert_eq!(req.spec.as_deref(), Some("@ https://host:8080"));
        assert_eq!(req.selector, None);

        let req = Requirement::parse("foo @ https://host:8080:linux64", "doc").unwrap();
        assert_eq!(req.spec.as_deref(), Some("@ https://host:8080"));
        assert_eq!(req.selector.as_deref(), Some("linux64"));
    }

    #[test]
    fn test_requirement_malformed() {
        assert!(matches!(
            Requirement::parse(">=1.0", "doc"),
            Err(DuoError::MalformedEntry { .. })
        ));
        assert!(Requirement::parse("", "doc").is_err());
        assert!(Requirement::parse("foo[bar", "doc").is_err());
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("../project"));
        assert!(looks_like_path("./lib"));
        assert!(looks_like_path("libs/core"));
        assert!(!looks_like_path("numpy"));
    }

    #[test]
    fn test_manager_covers() {
        assert!(Manager::Both.covers(Side::Conda));
        assert!(Manager::Both.covers(Side::Pip));
        assert!(Manager::CondaOnly.covers(Side::Conda));
        assert!(!Manager::CondaOnly.covers(Side::Pip));
        assert!(!Manager::PipOnly.covers(Side::Conda));
    }

    #[test]
    fn test_raw_entry_display() {
        let origin = Origin::new("requirements.yaml", 0);
        let entry = RawEntry::qualified(Some("mumps"), Some("mumps-py"), origin.clone());
        assert_eq!(entry.display_text(), "{conda: mumps, pip: mumps-py}");
        assert_eq!(origin.to_string(), "requirements.yaml, entry 1");
    }
}
