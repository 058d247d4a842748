//! pyproject.toml parsing
//!
//! A `pyproject.toml` is a dependency document when it has a
//! `[tool.duodep]` table. The table takes the same keys as
//! `requirements.yaml`; `[project] dependencies` are folded in according to
//! `project_dependency_handling`.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use duodep_core::error::DuoError;
use duodep_core::Document;

use crate::raw::{EntryValue, QualifiedEntry, RawDocument};
use crate::selector::{rewrite_comment_selectors, Syntax};
use crate::ConfigResult;

/// The parts of `pyproject.toml` duodep reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PyProject {
    #[serde(default)]
    pub project: Option<ProjectTable>,

    #[serde(default)]
    pub tool: Option<ToolTable>,

    /// Only its presence matters
    #[serde(default, rename = "build-system")]
    pub build_system: Option<toml::Value>,
}

/// `[project]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectTable {
    #[serde(default)]
    pub name: Option<String>,

    /// PEP 508 requirement strings
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// `[tool]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolTable {
    #[serde(default)]
    pub duodep: Option<RawDocument>,
}

impl PyProject {
    /// Has a `[tool.duodep]` table
    pub fn is_duodep(&self) -> bool {
        self.tool.as_ref().map_or(false, |tool| tool.duodep.is_some())
    }

    /// Has a `[build-system]` table, so `pip install <dir>` works
    pub fn has_build_system(&self) -> bool {
        self.build_system.is_some()
    }
}

/// How `[project] dependencies` enter the document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectDependencyHandling {
    /// Install under the same name with both managers
    SameName,
    /// Install with pip only
    PipOnly,
    /// Leave them out
    #[default]
    Ignore,
}

impl ProjectDependencyHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectDependencyHandling::SameName => "same-name",
            ProjectDependencyHandling::PipOnly => "pip-only",
            ProjectDependencyHandling::Ignore => "ignore",
        }
    }

    fn entry(&self, requirement: &str) -> Option<EntryValue> {
        // Environment markers are not selectors
        let requirement = requirement.split(';').next().unwrap_or_default().trim();
        if requirement.is_empty() {
            return None;
        }
        match self {
            ProjectDependencyHandling::SameName => Some(EntryValue::Text(requirement.to_string())),
            ProjectDependencyHandling::PipOnly => Some(EntryValue::Qualified(QualifiedEntry {
                pip: Some(requirement.to_string()),
                ..QualifiedEntry::default()
            })),
            ProjectDependencyHandling::Ignore => None,
        }
    }
}

impl fmt::Display for ProjectDependencyHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectDependencyHandling {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "same-name" => Ok(ProjectDependencyHandling::SameName),
            "pip-only" => Ok(ProjectDependencyHandling::PipOnly),
            "ignore" => Ok(ProjectDependencyHandling::Ignore),
            other => Err(DuoError::ConfigValidation {
                field: "project_dependency_handling".to_string(),
                reason: format!("expected `same-name`, `pip-only` or `ignore`, got `{}`", other),
            }),
        }
    }
}

/// Parse the pyproject tables without interpreting `[tool.duodep]`
pub fn parse_pyproject_tables(content: &str, id: &str) -> ConfigResult<PyProject> {
    toml::from_str(content).map_err(|e| DuoError::TomlParse {
        path: id.to_string(),
        message: e.to_string(),
    })
}

/// Parse `pyproject.toml` content; `None` when it has no `[tool.duodep]`
pub fn parse_pyproject(
    content: &str,
    id: &str,
    path: Option<Utf8PathBuf>,
) -> ConfigResult<Option<Document>> {
    let rewritten = rewrite_comment_selectors(content, Syntax::Toml, id)?;
    let pyproject = parse_pyproject_tables(&rewritten, id)?;

    let Some(mut raw) = pyproject.tool.and_then(|tool| tool.duodep) else {
        debug!("{} has no [tool.duodep] table", id);
        return Ok(None);
    };

    let handling = raw
        .project_dependency_handling
        .take()
        .map(|value| value.parse::<ProjectDependencyHandling>())
        .transpose()?
        .unwrap_or_default();

    if let Some(project) = pyproject.project {
        if raw.name.is_none() {
            raw.name = project.name;
        }
        let added: Vec<EntryValue> = project
            .dependencies
            .iter()
            .filter_map(|requirement| handling.entry(requirement))
            .collect();
        if !added.is_empty() {
            debug!(
                "Adding {} [project] dependencies from {} as {}",
                added.len(),
                id,
                handling
            );
        }
        raw.dependencies.extend(added);
    }

    raw.into_document(id, path).map(Some)
}

/// Load and parse pyproject.toml from file path
pub fn load_from_file(path: &Utf8Path) -> ConfigResult<Option<Document>> {
    let content = read(path)?;
    parse_pyproject(&content, path.as_str(), Some(path.to_path_buf()))
}

/// Read only the tables of a pyproject.toml on disk
pub fn inspect_file(path: &Utf8Path) -> ConfigResult<PyProject> {
    let content = read(path)?;
    parse_pyproject_tables(&content, path.as_str())
}

fn read(path: &Utf8Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|e| DuoError::io(format!("Failed to read {}", path), e))
}
