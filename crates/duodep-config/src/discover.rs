//! Requirement file discovery

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use duodep_core::error::DuoError;

use crate::{toml, ConfigResult, PYPROJECT_FILE, REQUIREMENTS_FILE};

/// Find every `requirements.yaml` and duodep `pyproject.toml` under `dir`.
///
/// `depth` counts directory levels below `dir`: 0 only looks at `dir`
/// itself. Results are sorted.
pub fn find_requirements_files(dir: &Utf8Path, depth: usize) -> ConfigResult<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).max_depth(depth + 1) {
        let entry = entry.map_err(|e| {
            let message = format!("Failed to scan {}", dir);
            match e.into_io_error() {
                Some(source) => DuoError::io(message, source),
                None => DuoError::ConfigValidation {
                    field: "directory".to_string(),
                    reason: message,
                },
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
            continue;
        };
        match path.file_name() {
            Some(REQUIREMENTS_FILE) => found.push(path),
            Some(PYPROJECT_FILE) => {
                if toml::inspect_file(&path)?.is_duodep() {
                    found.push(path);
                }
            },
            _ => {},
        }
    }

    found.sort();
    debug!("Found {} dependency documents under {}", found.len(), dir);
    Ok(found)
}
