//! Error types and result aliases for duodep operations.
//!
//! Provides a unified error type that covers every failure a merge can hit,
//! from a malformed entry in one document to an intractable version conflict
//! across several, with actionable error messages.

use thiserror::Error;

/// Unified error type for all duodep operations
#[derive(Error, Debug)]
pub enum DuoError {
    // Entry and selector errors
    #[error("Malformed dependency entry `{entry}` in {document}: {reason}")]
    MalformedEntry {
        document: String,
        entry: String,
        reason: String,
    },

    #[error("Unknown platform selector `{selector}`{}", context_suffix(.document))]
    UnknownSelector {
        selector: String,
        document: Option<String>,
    },

    #[error("Unknown platform `{platform}`")]
    UnknownPlatform { platform: String },

    #[error("Invalid version spec `{spec}`: {reason}")]
    InvalidVersionSpec { spec: String, reason: String },

    // Merge errors
    #[error(
        "Version conflict for {manager} package `{package}` on [{platforms}]: \
         `{first}` (from {first_origin}) contradicts `{second}` (from {second_origin}): {reason}"
    )]
    VersionConflict {
        package: String,
        manager: String,
        first: String,
        first_origin: String,
        second: String,
        second_origin: String,
        platforms: String,
        reason: String,
        /// Sequence index of the later of the two entries
        later_sequence: usize,
    },

    #[error(
        "Cannot resolve multiple {kind} pins for {manager} package `{package}` on [{platforms}]: \
         `{first}` (from {first_origin}) and `{second}` (from {second_origin})"
    )]
    DuplicateBuildOrSpecialPin {
        package: String,
        manager: String,
        kind: String,
        first: String,
        first_origin: String,
        second: String,
        second_origin: String,
        platforms: String,
        later_sequence: usize,
    },

    #[error("Cyclic include detected: {cycle}")]
    CyclicInclude { cycle: String },

    // Document errors
    #[error("Dependency document not found: {path}")]
    DocumentNotFound { path: String },

    #[error("Failed to parse {path}: {message}")]
    YamlParse { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    TomlParse { path: String, message: String },

    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for duodep operations
pub type DuoResult<T> = Result<T, DuoError>;

fn context_suffix(document: &Option<String>) -> String {
    match document {
        Some(doc) => format!(" in {}", doc),
        None => String::new(),
    }
}

impl DuoError {
    /// Create an IO error from std::io::Error
    pub fn io(message: String, source: std::io::Error) -> Self {
        Self::Io { message, source }
    }

    /// Create a malformed-entry error
    pub fn malformed(document: &str, entry: &str, reason: impl Into<String>) -> Self {
        Self::MalformedEntry {
            document: document.to_string(),
            entry: entry.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-version-spec error
    pub fn invalid_spec(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidVersionSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a conflict the caller may downgrade to a warning
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DuoError::VersionConflict { .. } | DuoError::DuplicateBuildOrSpecialPin { .. }
        )
    }

    /// Sequence index of the later entry involved in a conflict
    pub fn later_sequence(&self) -> Option<usize> {
        match self {
            DuoError::VersionConflict { later_sequence, .. }
            | DuoError::DuplicateBuildOrSpecialPin { later_sequence, .. } => Some(*later_sequence),
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            DuoError::MalformedEntry { .. } => Some(
                "Entries are either a string like 'numpy >=1.20' or a mapping with 'conda' and/or 'pip' keys",
            ),
            DuoError::UnknownSelector { .. } => Some(
                "Valid selectors: linux64, aarch64, ppc64le, osx64, arm64, win64, win, unix, linux, osx, macos",
            ),
            DuoError::UnknownPlatform { .. } => Some(
                "Valid platforms: linux-64, linux-aarch64, linux-ppc64le, osx-64, osx-arm64, win-64",
            ),
            DuoError::InvalidVersionSpec { .. } => {
                Some("Supported operators are =, ==, !=, >, >=, <, <=, ~= plus conda build strings and '@ <url>' pins")
            },
            DuoError::VersionConflict { .. } => Some(
                "Fix the pins by hand, use --overwrite-pin, or pass --conflict-policy keep-first",
            ),
            DuoError::DuplicateBuildOrSpecialPin { .. } => {
                Some("Declare the build string or URL pin for this package in one place only")
            },
            DuoError::CyclicInclude { .. } => {
                Some("Remove one of the local_dependencies entries that closes the cycle")
            },
            DuoError::DocumentNotFound { .. } => {
                Some("Check the path in local_dependencies or pass an existing file or directory")
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_selector_message() {
        let err = DuoError::UnknownSelector {
            selector: "linux32".to_string(),
            document: Some("requirements.yaml".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Unknown platform selector `linux32` in requirements.yaml"
        );

        let err = DuoError::UnknownSelector {
            selector: "bsd".to_string(),
            document: None,
        };
        assert_eq!(err.to_string(), "Unknown platform selector `bsd`");
    }

    #[test]
    fn test_conflict_classification() {
        let err = DuoError::VersionConflict {
            package: "foo".to_string(),
            manager: "conda".to_string(),
            first: ">1".to_string(),
            first_origin: "a.yaml#0".to_string(),
            second: "<1".to_string(),
            second_origin: "b.yaml#3".to_string(),
            platforms: "linux-64".to_string(),
            reason: "empty range".to_string(),
            later_sequence: 3,
        };
        assert!(err.is_conflict());
        assert_eq!(err.later_sequence(), Some(3));
        assert!(err.suggestion().is_some());
        let message = err.to_string();
        assert!(message.contains("`>1` (from a.yaml#0)"));
        assert!(message.contains("`<1` (from b.yaml#3)"));

        let err = DuoError::CyclicInclude {
            cycle: "a -> b -> a".to_string(),
        };
        assert!(!err.is_conflict());
        assert_eq!(err.later_sequence(), None);
    }
}
