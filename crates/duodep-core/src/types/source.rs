//! The seam between document loading and include traversal.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use super::document::Document;
use crate::error::DuoResult;

/// A local package that is installed by path instead of being parsed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LocalPackage {
    pub path: Utf8PathBuf,
    pub kind: LocalPackageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalPackageKind {
    /// A built `.whl` or `.zip`
    Archive,
    /// A project directory without a dependency document
    Project {
        /// Has `setup.py` or a `pyproject.toml` with `[build-system]`
        pip_installable: bool,
    },
}

/// What a local dependency reference resolves to
#[derive(Debug, Clone)]
pub enum LocatedReference {
    /// A dependency document; its `path` is the traversal key
    Document(Document),
    /// A local package contributing no entries
    LocalPackage(LocalPackage),
}

/// Resolves local dependency references to documents or local packages
pub trait DocumentSource {
    /// Resolve `reference` (already stripped of `[extras]`) relative to the
    /// directory of the referencing document
    fn locate(&self, base_dir: &Utf8Path, reference: &str) -> DuoResult<LocatedReference>;
}
