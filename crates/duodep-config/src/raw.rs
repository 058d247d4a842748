//! Serde model shared by the YAML and TOML loaders
//!
//! `requirements.yaml` and the `[tool.duodep]` table of `pyproject.toml`
//! use the same keys; both deserialize into [`RawDocument`] before being
//! checked and turned into a [`Document`].

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

use duodep_core::types::RawEntry;
use duodep_core::{Document, DuoError, Origin, Platform};

use crate::ConfigResult;

/// Document keys as written
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDocument {
    pub name: Option<String>,
    pub channels: Vec<String>,
    pub platforms: Option<Vec<String>>,
    pub dependencies: Vec<EntryValue>,
    pub local_dependencies: Option<Vec<String>>,
    /// Deprecated alias of `local_dependencies`
    pub includes: Option<Vec<String>>,
    pub optional_dependencies: IndexMap<String, Vec<EntryValue>>,
    pub pip_indices: Vec<String>,
    /// Only meaningful in `pyproject.toml`
    pub project_dependency_handling: Option<String>,
}

/// One dependency entry before validation
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    Text(String),
    Qualified(QualifiedEntry),
    Other(serde_json::Value),
}

/// `{conda: ..., pip: ...}` entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualifiedEntry {
    #[serde(default)]
    pub conda: Option<String>,
    #[serde(default)]
    pub pip: Option<String>,
    /// Whole-entry selector, written by the comment lexer for inline maps
    #[serde(default)]
    pub selector: Option<String>,
}

impl EntryValue {
    fn into_entry(self, origin: Origin, document: &str) -> ConfigResult<RawEntry> {
        match self {
            EntryValue::Text(text) => {
                if text.trim().is_empty() {
                    return Err(DuoError::malformed(document, &text, "empty dependency entry"));
                }
                Ok(RawEntry::bare(text, origin))
            },
            EntryValue::Qualified(QualifiedEntry { conda, pip, selector }) => {
                if conda.is_none() && pip.is_none() {
                    return Err(DuoError::malformed(
                        document,
                        "{}",
                        "a mapping entry needs a `conda` or `pip` key",
                    ));
                }
                let entry = RawEntry::qualified(conda.as_deref(), pip.as_deref(), origin);
                Ok(match selector {
                    Some(selector) => entry.with_selector(selector),
                    None => entry,
                })
            },
            EntryValue::Other(value) => Err(DuoError::malformed(
                document,
                &value.to_string(),
                "expected a string or a mapping with `conda` and/or `pip` keys",
            )),
        }
    }
}

impl RawDocument {
    /// Validate and convert into the document model
    pub fn into_document(self, id: &str, path: Option<Utf8PathBuf>) -> ConfigResult<Document> {
        let local_dependencies = match (self.local_dependencies, self.includes) {
            (Some(_), Some(_)) => {
                return Err(DuoError::ConfigValidation {
                    field: "includes".to_string(),
                    reason: format!(
                        "{} sets both `includes` and `local_dependencies`; use `local_dependencies` only",
                        id
                    ),
                })
            },
            (None, Some(includes)) => {
                warn!(
                    "`includes` in {} is deprecated and will be removed; rename it to `local_dependencies`",
                    id
                );
                includes
            },
            (local, None) => local.unwrap_or_default(),
        };

        let platforms = self
            .platforms
            .map(|names| {
                names
                    .iter()
                    .map(|name| name.parse::<Platform>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let mut document = Document::new(id);
        document.path = path;
        document.name = self.name;
        document.channels = self.channels;
        document.platforms = platforms;
        document.local_dependencies = local_dependencies;
        document.pip_indices = self.pip_indices;

        for value in self.dependencies {
            let entry = value.into_entry(document.next_origin(), id)?;
            document.dependencies.push(entry);
        }

        for (group, values) in self.optional_dependencies {
            document.optional_dependencies.entry(group.clone()).or_default();
            for value in values {
                let entry = value.into_entry(document.next_origin(), id)?;
                if let Some(entries) = document.optional_dependencies.get_mut(&group) {
                    entries.push(entry);
                }
            }
        }

        Ok(document)
    }
}
