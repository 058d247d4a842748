//! Document loading and settings for duodep
//!
//! This crate reads `requirements.yaml` and `pyproject.toml` files into the
//! [`Document`](duodep_core::Document) model, resolves local dependency
//! references on disk, and layers user settings from config file,
//! environment and command line.

pub mod discover;
pub mod loader;
pub mod raw;
pub mod selector;
pub mod settings;
pub mod toml;
pub mod yaml;

// Re-export main types
pub use discover::find_requirements_files;
pub use loader::{load_document, FsLoader};
pub use selector::rewrite_comment_selectors;
pub use settings::{CliOverrides, Settings, SettingsFile, SettingsLayering, SettingsSource};
pub use crate::toml::{parse_pyproject, ProjectDependencyHandling, PyProject};
pub use yaml::parse_requirements_yaml;

use duodep_core::error::DuoError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, DuoError>;

/// File name of a YAML dependency document
pub const REQUIREMENTS_FILE: &str = "requirements.yaml";

/// File name of a TOML dependency document
pub const PYPROJECT_FILE: &str = "pyproject.toml";
