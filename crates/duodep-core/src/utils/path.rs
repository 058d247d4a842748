//! Path utilities for document references.
//!
//! Include references are written relative to the referencing document and
//! may carry an `[extras]` suffix; documents are keyed by normalized absolute
//! paths so the same file reached two ways is recognized.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Normalize a path by resolving . and .. components lexically
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components: Vec<Utf8Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {},
            Utf8Component::ParentDir => match components.last() {
                Some(Utf8Component::Normal(_)) => {
                    components.pop();
                },
                Some(Utf8Component::RootDir) | Some(Utf8Component::Prefix(_)) => {
                    // `/..` is `/`
                },
                _ => components.push(component),
            },
            other => components.push(other),
        }
    }

    if components.is_empty() {
        return Utf8PathBuf::from(".");
    }
    components.iter().collect()
}

/// Split `path/to/project[test,docs]` into the path and its extras
pub fn split_path_and_extras(reference: &str) -> (&str, Vec<String>) {
    let trimmed = reference.trim();
    if let Some(stripped) = trimmed.strip_suffix(']') {
        if let Some(open) = stripped.rfind('[') {
            let extras = stripped[open + 1..]
                .split(',')
                .map(|extra| extra.trim().to_string())
                .filter(|extra| !extra.is_empty())
                .collect();
            return (&stripped[..open], extras);
        }
    }
    (trimmed, Vec::new())
}

/// Check whether a path names a built archive rather than a project
pub fn is_archive(path: &Utf8Path) -> bool {
    matches!(
        path.extension().map(|ext| ext.to_ascii_lowercase()).as_deref(),
        Some("whl") | Some("zip")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        let path = Utf8Path::new("./src/../lib/./file.rs");
        assert_eq!(normalize_path(path), Utf8Path::new("lib/file.rs"));

        let path = Utf8Path::new("/work/app/../lib");
        assert_eq!(normalize_path(path), Utf8Path::new("/work/lib"));

        assert_eq!(normalize_path(Utf8Path::new("/..")), Utf8Path::new("/"));
        assert_eq!(normalize_path(Utf8Path::new("../x")), Utf8Path::new("../x"));
        assert_eq!(normalize_path(Utf8Path::new("./")), Utf8Path::new("."));
    }

    #[test]
    fn test_split_path_and_extras() {
        assert_eq!(split_path_and_extras("../lib"), ("../lib", vec![]));
        assert_eq!(
            split_path_and_extras("../lib[test, docs]"),
            ("../lib", vec!["test".to_string(), "docs".to_string()])
        );
        assert_eq!(split_path_and_extras("pkg[*]"), ("pkg", vec!["*".to_string()]));
    }

    #[test]
    fn test_is_archive() {
        assert!(is_archive(Utf8Path::new("dist/pkg-1.0-py3-none-any.whl")));
        assert!(is_archive(Utf8Path::new("vendor/PKG.ZIP")));
        assert!(!is_archive(Utf8Path::new("../project")));
    }
}
