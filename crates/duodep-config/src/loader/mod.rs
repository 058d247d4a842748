//! Filesystem document source
//!
//! Resolves local dependency references on disk. A reference names either a
//! dependency document (a `requirements.yaml`, a duodep `pyproject.toml`, or
//! a directory holding one) or a local package that is installed by path.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use duodep_core::error::DuoError;
use duodep_core::types::{DocumentSource, LocalPackage, LocalPackageKind, LocatedReference};
use duodep_core::utils::{is_archive, normalize_path};
use duodep_core::{Document, DuoResult};

use crate::{toml, yaml, ConfigResult, PYPROJECT_FILE, REQUIREMENTS_FILE};

/// [`DocumentSource`] backed by the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl FsLoader {
    pub fn new() -> Self {
        Self
    }

    /// Classify an absolute, normalized path
    pub fn classify(&self, path: &Utf8Path) -> ConfigResult<LocatedReference> {
        if !path.exists() {
            return Err(DuoError::DocumentNotFound {
                path: path.to_string(),
            });
        }

        if path.is_file() {
            return classify_file(path);
        }

        let requirements = path.join(REQUIREMENTS_FILE);
        if requirements.is_file() {
            return yaml::load_from_file(&requirements).map(LocatedReference::Document);
        }

        let pyproject = path.join(PYPROJECT_FILE);
        let mut pip_installable = path.join("setup.py").is_file();
        if pyproject.is_file() {
            if let Some(document) = toml::load_from_file(&pyproject)? {
                return Ok(LocatedReference::Document(document));
            }
            pip_installable |= toml::inspect_file(&pyproject)?.has_build_system();
        }

        debug!(
            "{} has no dependency document; treating it as a local package",
            path
        );
        Ok(LocatedReference::LocalPackage(LocalPackage {
            path: path.to_path_buf(),
            kind: LocalPackageKind::Project { pip_installable },
        }))
    }
}

fn classify_file(path: &Utf8Path) -> ConfigResult<LocatedReference> {
    if is_archive(path) {
        return Ok(LocatedReference::LocalPackage(LocalPackage {
            path: path.to_path_buf(),
            kind: LocalPackageKind::Archive,
        }));
    }

    if path.file_name() == Some(PYPROJECT_FILE) {
        return match toml::load_from_file(path)? {
            Some(document) => Ok(LocatedReference::Document(document)),
            None => Err(DuoError::ConfigValidation {
                field: "tool.duodep".to_string(),
                reason: format!("{} has no [tool.duodep] table", path),
            }),
        };
    }

    if matches!(path.extension(), Some("yaml") | Some("yml")) {
        return yaml::load_from_file(path).map(LocatedReference::Document);
    }

    Err(DuoError::ConfigValidation {
        field: "local_dependencies".to_string(),
        reason: format!(
            "{} is neither a dependency document nor a .whl/.zip archive",
            path
        ),
    })
}

impl DocumentSource for FsLoader {
    fn locate(&self, base_dir: &Utf8Path, reference: &str) -> DuoResult<LocatedReference> {
        let path = normalize_path(&base_dir.join(reference));
        self.classify(&path)
    }
}

/// Make `path` absolute against the working directory and normalize it
pub fn absolute(path: &Utf8Path) -> ConfigResult<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_path(path));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| DuoError::io("Failed to read the current directory".to_string(), e))?;
    let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| DuoError::ConfigValidation {
        field: "current_dir".to_string(),
        reason: format!("Working directory is not valid UTF-8: {}", e),
    })?;
    Ok(normalize_path(&cwd.join(path)))
}

/// Load the dependency document at `path`, a file or a directory holding one
pub fn load_document(path: &Utf8Path) -> ConfigResult<Document> {
    let path = absolute(path)?;
    match FsLoader::new().classify(&path)? {
        LocatedReference::Document(document) => Ok(document),
        LocatedReference::LocalPackage(_) => Err(DuoError::DocumentNotFound {
            path: format!("{} (no {} or [tool.duodep] found)", path, REQUIREMENTS_FILE),
        }),
    }
}
