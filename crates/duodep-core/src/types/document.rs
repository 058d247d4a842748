//! In-memory dependency specification documents.
//!
//! Loaders in `duodep-config` build these from `requirements.yaml` or
//! `pyproject.toml`; the include walker and merge engine only see this form.

use camino::Utf8PathBuf;
use indexmap::IndexMap;

use super::dependency::{Origin, RawEntry};
use super::platform::Platform;

/// A parsed dependency specification document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Identifier used in diagnostics, usually the file path
    pub id: String,
    /// Normalized absolute path of the file the document was read from
    pub path: Option<Utf8PathBuf>,
    pub name: Option<String>,
    pub channels: Vec<String>,
    /// Declared supported platforms; `None` means every known platform
    pub platforms: Option<Vec<Platform>>,
    pub dependencies: Vec<RawEntry>,
    /// References to other documents or local packages, relative to the
    /// document, optionally suffixed with `[extra,...]`
    pub local_dependencies: Vec<String>,
    pub optional_dependencies: IndexMap<String, Vec<RawEntry>>,
    pub pip_indices: Vec<String>,
}

impl Document {
    /// Create an empty document
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Origin for the next dependency entry
    pub fn next_origin(&self) -> Origin {
        let index = self.dependencies.len()
            + self.optional_dependencies.values().map(Vec::len).sum::<usize>();
        Origin::new(self.id.clone(), index)
    }

    /// Append a bare requirement string
    pub fn with_dependency(mut self, text: &str) -> Self {
        let entry = RawEntry::bare(text, self.next_origin());
        self.dependencies.push(entry);
        self
    }

    /// Append a manager-qualified entry
    pub fn with_qualified(mut self, conda: Option<&str>, pip: Option<&str>) -> Self {
        let entry = RawEntry::qualified(conda, pip, self.next_origin());
        self.dependencies.push(entry);
        self
    }

    pub fn with_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channels.push(channel.to_string());
        self
    }

    pub fn with_local_dependency(mut self, reference: &str) -> Self {
        self.local_dependencies.push(reference.to_string());
        self
    }

    pub fn with_platforms(mut self, platforms: &[Platform]) -> Self {
        self.platforms = Some(platforms.to_vec());
        self
    }

    /// Append an entry to an optional dependency group
    pub fn with_optional(mut self, group: &str, text: &str) -> Self {
        let entry = RawEntry::bare(text, self.next_origin());
        self.optional_dependencies
            .entry(group.to_string())
            .or_default()
            .push(entry);
        self
    }
}
