//! Selector comments
//!
//! An entry may carry its platform selector as a trailing comment,
//! `- cuda-toolkit  # [linux64]`. YAML and TOML parsers drop comments, so
//! this lexer rewrites them into the `:selector` suffix form (or a
//! `selector` key on an inline mapping) before the text is parsed.

use duodep_core::types::expand_all;
use duodep_core::{DuoError, Requirement};
use tracing::warn;

use crate::ConfigResult;

/// Document syntax the lexer is running over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Yaml,
    Toml,
}

/// Keys whose entries accept selectors
const SELECTOR_SECTIONS: [&str; 2] = ["dependencies", "optional_dependencies"];

/// Rewrite every `# [selector]` comment on a dependency line into the
/// selector form the parser understands. Lines outside the dependency
/// sections are copied unchanged.
pub fn rewrite_comment_selectors(text: &str, syntax: Syntax, document: &str) -> ConfigResult<String> {
    let mut out = String::with_capacity(text.len() + 64);
    let mut scope = Scope::default();

    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];

        scope.observe(body, syntax);
        if scope.accepts_selectors() {
            out.push_str(&rewrite_line(body, syntax, document)?);
        } else {
            out.push_str(body);
        }
        out.push_str(ending);
    }

    Ok(out)
}

/// Tracks which key or table the lexer is inside
#[derive(Debug, Default)]
struct Scope {
    key: Option<String>,
    table: Option<String>,
}

impl Scope {
    fn observe(&mut self, line: &str, syntax: Syntax) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        match syntax {
            Syntax::Yaml => {
                // Only top-level keys open a section
                if line.starts_with(char::is_whitespace) || trimmed.starts_with('-') {
                    return;
                }
                if let Some((key, _)) = trimmed.split_once(':') {
                    self.key = Some(unquote(key.trim()).to_string());
                }
            },
            Syntax::Toml => {
                if let Some(header) = trimmed.strip_prefix('[') {
                    if !header.starts_with('[') && !header.starts_with('"') {
                        let name = header.split(']').next().unwrap_or_default();
                        self.table = Some(name.trim().to_string());
                        self.key = None;
                    }
                    return;
                }
                if let Some((key, _)) = trimmed.split_once('=') {
                    let key = key.trim();
                    if !key.is_empty()
                        && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '"'))
                    {
                        self.key = Some(unquote(key).to_string());
                    }
                }
            },
        }
    }

    fn accepts_selectors(&self) -> bool {
        let in_key = self
            .key
            .as_deref()
            .map_or(false, |key| SELECTOR_SECTIONS.contains(&key));
        let in_table = self
            .table
            .as_deref()
            .map_or(false, |table| table.ends_with("optional_dependencies"));
        in_key || in_table
    }
}

fn rewrite_line(body: &str, syntax: Syntax, document: &str) -> ConfigResult<String> {
    let Some(hash) = find_comment(body) else {
        return Ok(body.to_string());
    };
    let Some(selector) = parse_selector_comment(&body[hash + 1..], body, document)? else {
        return Ok(body.to_string());
    };

    let code = body[..hash].trim_end();
    let Some(start) = value_offset(code, syntax) else {
        warn!(
            "Ignoring selector comment `[{}]` on a line that is not a dependency entry in {}: {}",
            selector,
            document,
            body.trim()
        );
        return Ok(body.to_string());
    };

    let value = attach_selector(&code[start..], &selector, syntax, document);
    Ok(format!("{}{}{}", &code[..start], value, &body[code.len()..]))
}

/// Byte offset of the first `#` that starts a comment
fn find_comment(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut previous = ' ';

    for (i, c) in line.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {},
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' && previous.is_whitespace() => return Some(i),
            None => {},
        }
        previous = c;
    }
    None
}

/// Selector text from a comment body, or `None` when the comment is not a
/// selector comment
fn parse_selector_comment(comment: &str, line: &str, document: &str) -> ConfigResult<Option<String>> {
    let Some(rest) = comment.trim_start().strip_prefix('[') else {
        return Ok(None);
    };
    let Some(close) = rest.find(']') else {
        return Err(DuoError::malformed(document, line.trim(), "unclosed selector bracket"));
    };

    let inner = &rest[..close];
    if inner.contains('[') || rest[close + 1..].contains('[') {
        return Err(DuoError::malformed(
            document,
            line.trim(),
            "multiple selector groups in one comment",
        ));
    }

    expand_all(inner).map_err(|err| match err {
        DuoError::UnknownSelector { selector, .. } => DuoError::UnknownSelector {
            selector,
            document: Some(document.to_string()),
        },
        other => other,
    })?;

    Ok(Some(inner.split_whitespace().collect::<Vec<_>>().join(" ")))
}

/// Where the entry value starts on a dependency line
fn value_offset(code: &str, syntax: Syntax) -> Option<usize> {
    let mut offset = code.len() - code.trim_start().len();
    let mut rest = &code[offset..];

    if syntax == Syntax::Yaml {
        if let Some(after) = rest.strip_prefix('-') {
            if !after.is_empty() && !after.starts_with(' ') {
                return None;
            }
            let skipped = 1 + (after.len() - after.trim_start().len());
            offset += skipped;
            rest = &code[offset..];
        } else if !rest.starts_with("conda:") && !rest.starts_with("pip:") {
            return None;
        }

        for key in ["conda:", "pip:"] {
            if let Some(after) = rest.strip_prefix(key) {
                offset += key.len() + (after.len() - after.trim_start().len());
                rest = &code[offset..];
                break;
            }
        }
        if rest.is_empty() || (!rest.starts_with('{') && rest.contains(": ")) {
            return None;
        }
        return Some(offset);
    }

    if let Some(after) = rest.strip_prefix("conda").or_else(|| rest.strip_prefix("pip")) {
        if let Some(value) = after.trim_start().strip_prefix('=') {
            offset = code.len() - value.trim_start().len();
            rest = &code[offset..];
        }
    }
    matches!(rest.chars().next(), Some('"' | '\'' | '{')).then_some(offset)
}

fn attach_selector(value: &str, selector: &str, syntax: Syntax, document: &str) -> String {
    let (value, comma) = match value.strip_suffix(',') {
        Some(stripped) => (stripped.trim_end(), ","),
        None => (value, ""),
    };

    let rewritten = if let Some(inner) = value.strip_suffix('}') {
        if inner.contains("selector") {
            value.to_string()
        } else {
            match syntax {
                Syntax::Yaml => format!("{}, selector: {}}}", inner.trim_end(), selector),
                Syntax::Toml => format!("{}, selector = \"{}\" }}", inner.trim_end(), selector),
            }
        }
    } else if let Some((quote, inner)) = quoted(value) {
        if has_selector_suffix(inner, document) {
            value.to_string()
        } else {
            format!("{q}{}:{}{q}", inner, selector, q = quote)
        }
    } else if has_selector_suffix(value, document) {
        value.to_string()
    } else {
        format!("{}:{}", value, selector)
    };

    format!("{}{}", rewritten, comma)
}

/// An explicit `:selector` suffix takes precedence over the comment
fn has_selector_suffix(text: &str, document: &str) -> bool {
    Requirement::parse(text, document).map_or(false, |req| req.selector.is_some())
}

fn quoted(value: &str) -> Option<(char, &str)> {
    let quote = value.chars().next().filter(|c| matches!(c, '"' | '\''))?;
    let inner = value.strip_prefix(quote)?.strip_suffix(quote)?;
    Some((quote, inner))
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> String {
        rewrite_comment_selectors(text, Syntax::Yaml, "requirements.yaml").unwrap()
    }

    #[test]
    fn test_rewrites_list_entries() {
        let text = "\
name: demo
channels:
  - conda-forge  # [linux]
dependencies:
  - numpy >=1.20  # [linux64]
  - cuda-toolkit # [linux64 win64]
  - pandas
";
        let out = yaml(text);
        assert!(out.contains("  - conda-forge  # [linux]\n"));
        assert!(out.contains("  - numpy >=1.20:linux64  # [linux64]\n"));
        assert!(out.contains("  - cuda-toolkit:linux64 win64 # [linux64 win64]\n"));
        assert!(out.ends_with("  - pandas\n"));
    }

    #[test]
    fn test_rewrites_qualified_entries() {
        let text = "\
dependencies:
  - conda: mumps  # [unix]
    pip: pymumps  # [osx]
  - {conda: cupy, pip: cupy-cuda12x}  # [linux64]
";
        let out = yaml(text);
        assert!(out.contains("  - conda: mumps:unix  # [unix]\n"));
        assert!(out.contains("    pip: pymumps:osx  # [osx]\n"));
        assert!(out.contains("  - {conda: cupy, pip: cupy-cuda12x, selector: linux64}  # [linux64]\n"));
    }

    #[test]
    fn test_quoted_values_and_existing_suffix() {
        let text = "\
dependencies:
  - \"numpy\"  # [osx]
  - 'scipy'  # [win]
  - foo:linux64  # [osx]
";
        let out = yaml(text);
        assert!(out.contains("  - \"numpy:osx\"  # [osx]"));
        assert!(out.contains("  - 'scipy:win'  # [win]"));
        assert!(out.contains("  - foo:linux64  # [osx]"));
    }

    #[test]
    fn test_optional_groups_accept_selectors() {
        let text = "\
optional_dependencies:
  test:
    - pytest  # [unix]
local_dependencies:
  - ../lib  # [linux]
";
        let out = yaml(text);
        assert!(out.contains("    - pytest:unix  # [unix]"));
        assert!(out.contains("  - ../lib  # [linux]"));
    }

    #[test]
    fn test_hash_inside_quotes_is_not_a_comment() {
        let text = "dependencies:\n  - \"foo # [linux]\"\n";
        assert_eq!(yaml(text), text);
    }

    #[test]
    fn test_plain_comments_are_left_alone() {
        let text = "dependencies:\n  - numpy  # pinned below\n";
        assert_eq!(yaml(text), text);
    }

    #[test]
    fn test_multiple_groups_are_malformed() {
        let text = "dependencies:\n  - numpy  # [linux] # [osx]\n";
        let err = rewrite_comment_selectors(text, Syntax::Yaml, "a.yaml").unwrap_err();
        assert!(matches!(err, DuoError::MalformedEntry { .. }));
    }

    #[test]
    fn test_unknown_selector_names_document() {
        let text = "dependencies:\n  - numpy  # [beos]\n";
        let err = rewrite_comment_selectors(text, Syntax::Yaml, "a.yaml").unwrap_err();
        match err {
            DuoError::UnknownSelector { selector, document } => {
                assert_eq!(selector, "beos");
                assert_eq!(document.as_deref(), Some("a.yaml"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_crlf_line_endings_survive() {
        let text = "dependencies:\r\n  - numpy  # [win]\r\n";
        assert_eq!(yaml(text), "dependencies:\r\n  - numpy:win  # [win]\r\n");
    }

    #[test]
    fn test_toml_array_entries() {
        let text = "\
[tool.duodep]
channels = [
    \"conda-forge\",  # [linux]
]
dependencies = [
    \"numpy >=1.20\",  # [linux64]
    { conda = \"mumps\", pip = \"pymumps\" },  # [unix]
    \"pandas\",
]
";
        let out = rewrite_comment_selectors(text, Syntax::Toml, "pyproject.toml").unwrap();
        assert!(out.contains("    \"conda-forge\",  # [linux]"));
        assert!(out.contains("    \"numpy >=1.20:linux64\",  # [linux64]"));
        assert!(out.contains("{ conda = \"mumps\", pip = \"pymumps\", selector = \"unix\" },"));
    }

    #[test]
    fn test_toml_optional_table() {
        let text = "\
[tool.duodep.optional_dependencies]
test = [
    \"pytest\",  # [osx]
]
";
        let out = rewrite_comment_selectors(text, Syntax::Toml, "pyproject.toml").unwrap();
        assert!(out.contains("    \"pytest:osx\",  # [osx]"));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use duodep_core::types::Selector;
    use proptest::prelude::*;

    fn entry_lines() -> impl Strategy<Value = Vec<(String, Option<usize>)>> {
        prop::collection::vec(
            ("[a-z][a-z0-9_-]{0,10}", prop::option::of(0usize..Selector::ALL.len())),
            0..8,
        )
    }

    fn render(lines: &[(String, Option<usize>)]) -> String {
        let mut text = String::from("dependencies:\n");
        for (name, selector) in lines {
            match selector {
                Some(index) => {
                    text.push_str(&format!("  - {}  # [{}]\n", name, Selector::ALL[*index].as_str()))
                },
                None => text.push_str(&format!("  - {}\n", name)),
            }
        }
        text
    }

    // Property 1: rewriting twice gives the same text as rewriting once
    proptest! {
        #[test]
        fn rewrite_is_idempotent(lines in entry_lines()) {
            let once = rewrite_comment_selectors(&render(&lines), Syntax::Yaml, "p.yaml").unwrap();
            let twice = rewrite_comment_selectors(&once, Syntax::Yaml, "p.yaml").unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    // Property 2: every commented entry ends up with its selector suffix and
    // nothing else changes line count
    proptest! {
        #[test]
        fn every_selector_becomes_a_suffix(lines in entry_lines()) {
            let out = rewrite_comment_selectors(&render(&lines), Syntax::Yaml, "p.yaml").unwrap();
            let rewritten: Vec<&str> = out.lines().skip(1).collect();
            prop_assert_eq!(rewritten.len(), lines.len());
            for ((name, selector), line) in lines.iter().zip(rewritten) {
                let expected = match selector {
                    Some(index) => format!("  - {}:{}", name, Selector::ALL[*index].as_str()),
                    None => format!("  - {}", name),
                };
                prop_assert!(line.starts_with(&expected));
            }
        }
    }
}
