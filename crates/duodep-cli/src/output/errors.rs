//! Error message formatting with actionable suggestions.
//!
//! Merge errors carry the package, both declarations and their origins; the
//! formatter adds a `help:` line from [`DuoError::suggestion`] and the chain
//! of underlying causes.

use super::colors::ColorSupport;
use duodep_core::error::DuoError;
use std::error::Error;

/// Error formatter with suggestions
pub struct ErrorFormatter {
    colors: ColorSupport,
}

impl ErrorFormatter {
    /// Create a new error formatter
    pub fn new() -> Self {
        Self {
            colors: ColorSupport::detect(),
        }
    }

    #[cfg(test)]
    pub fn with_colors(colors: ColorSupport) -> Self {
        Self { colors }
    }

    /// Format an error with context and suggestions
    pub fn format_error(&self, error: &DuoError) -> String {
        let mut output = self.format_simple(&error.to_string());
        output.push('\n');

        if let Some(suggestion) = error.suggestion() {
            output.push('\n');
            output.push_str(&self.colors.dim("help"));
            output.push_str(": ");
            output.push_str(suggestion);
            output.push('\n');
        }

        let mut source = error.source();
        while let Some(err) = source {
            self.push_cause(&mut output, &err.to_string());
            source = err.source();
        }

        output
    }

    /// Format a command error, using the merge error details when the
    /// chain contains a [`DuoError`]
    pub fn format_anyhow(&self, error: &anyhow::Error) -> String {
        let Some(duo) = error.chain().find_map(|cause| cause.downcast_ref::<DuoError>()) else {
            let mut output = self.format_simple(&error.to_string());
            for cause in error.chain().skip(1) {
                self.push_cause(&mut output, &cause.to_string());
            }
            return output;
        };

        let mut output = String::new();
        // Context added by the command, outermost first
        for cause in error.chain() {
            if cause.downcast_ref::<DuoError>().is_some() {
                break;
            }
            output.push_str(&self.format_simple(&cause.to_string()));
            output.push('\n');
        }
        output.push_str(&self.format_error(duo));
        output
    }

    /// Format a simple error message
    pub fn format_simple(&self, message: &str) -> String {
        format!("{}: {}", self.colors.red("error"), message)
    }

    fn push_cause(&self, output: &mut String, message: &str) {
        output.push('\n');
        output.push_str(&self.colors.dim("caused by"));
        output.push_str(": ");
        output.push_str(message);
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn plain() -> ErrorFormatter {
        ErrorFormatter::with_colors(ColorSupport::disabled())
    }

    #[test]
    fn test_conflict_has_help_line() {
        let error = DuoError::VersionConflict {
            package: "foo".to_string(),
            manager: "conda".to_string(),
            first: ">1".to_string(),
            first_origin: "a.yaml, entry 1".to_string(),
            second: "<1".to_string(),
            second_origin: "b.yaml, entry 3".to_string(),
            platforms: "linux-64".to_string(),
            reason: "empty range".to_string(),
            later_sequence: 4,
        };
        let text = plain().format_error(&error);
        assert!(text.starts_with("error: Version conflict for conda package `foo`"));
        assert!(text.contains("a.yaml, entry 1"));
        assert!(text.contains("\nhelp: "));
    }

    #[test]
    fn test_anyhow_context_is_kept_above_details() {
        let result: Result<(), DuoError> = Err(DuoError::DocumentNotFound {
            path: "/x/requirements.yaml".to_string(),
        });
        let error = result.context("Failed to merge /x").unwrap_err();

        let text = plain().format_anyhow(&error);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("error: Failed to merge /x"));
        assert_eq!(
            lines.next(),
            Some("error: Dependency document not found: /x/requirements.yaml")
        );
    }

    #[test]
    fn test_io_error_shows_cause() {
        let error = DuoError::io(
            "Failed to read a.yaml".to_string(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        let text = plain().format_error(&error);
        assert!(text.contains("caused by: no such file"));
    }

    #[test]
    fn test_plain_anyhow_error() {
        let error = anyhow::anyhow!("nothing to merge");
        assert_eq!(plain().format_anyhow(&error), "error: nothing to merge");
    }
}
