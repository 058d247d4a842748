//! requirements.yaml parsing

use camino::{Utf8Path, Utf8PathBuf};
use duodep_core::error::DuoError;
use duodep_core::Document;

use crate::raw::RawDocument;
use crate::selector::{rewrite_comment_selectors, Syntax};
use crate::ConfigResult;

/// Parse `requirements.yaml` content into a document identified by `id`
pub fn parse_requirements_yaml(
    content: &str,
    id: &str,
    path: Option<Utf8PathBuf>,
) -> ConfigResult<Document> {
    let rewritten = rewrite_comment_selectors(content, Syntax::Yaml, id)?;

    let value: serde_yaml::Value = serde_yaml::from_str(&rewritten).map_err(|e| yaml_error(id, e))?;
    let raw: RawDocument = if value.is_null() {
        // Empty or comment-only file
        RawDocument::default()
    } else {
        serde_yaml::from_value(value).map_err(|e| yaml_error(id, e))?
    };

    raw.into_document(id, path)
}

/// Load and parse requirements.yaml from file path
pub fn load_from_file(path: &Utf8Path) -> ConfigResult<Document> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DuoError::io(format!("Failed to read {}", path), e))?;
    parse_requirements_yaml(&content, path.as_str(), Some(path.to_path_buf()))
}

fn yaml_error(id: &str, error: serde_yaml::Error) -> DuoError {
    DuoError::YamlParse {
        path: id.to_string(),
        message: error.to_string(),
    }
}
