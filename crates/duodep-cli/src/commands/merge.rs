//! `duodep merge` command implementation.
//!
//! Merges requirement files, given explicitly or found by scanning a
//! directory, into one conda `environment.yaml`.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use clap::Args;
use serde::Serialize;

use duodep_config::{find_requirements_files, FsLoader, SettingsLayering};
use duodep_resolver::emit::{CondaLine, EnvironmentSpec};
use duodep_resolver::{merge_documents, SelectorStyle};

use super::{load_roots, report, CommandContext, OverrideArgs};

/// Environment name used when neither the flag nor a document sets one
pub const DEFAULT_ENV_NAME: &str = "myenv";

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// Requirement files or directories, optionally suffixed with `[extra,...]`
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Directory to scan when no files are given
    #[arg(short, long, default_value = ".")]
    pub directory: Utf8PathBuf,

    /// Directory levels to scan below `--directory`
    #[arg(long, default_value_t = 1)]
    pub depth: usize,

    /// Environment file to write
    #[arg(short, long, default_value = "environment.yaml")]
    pub output: Utf8PathBuf,

    /// Environment name
    #[arg(short, long)]
    pub name: Option<String>,

    /// How platform-specific entries are written: sel or comment
    #[arg(long, value_name = "STYLE")]
    pub selector_style: Option<SelectorStyle>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Print the environment file instead of writing it
    #[arg(long)]
    pub stdout: bool,
}

/// Execute the `duodep merge` command
pub fn execute(args: MergeArgs, ctx: &CommandContext) -> Result<()> {
    let settings = SettingsLayering::load(args.overrides.clone().into_cli(args.selector_style))?;

    let references = if args.files.is_empty() {
        let directory = ctx.resolve(&args.directory);
        let found = find_requirements_files(&directory, args.depth)?;
        if found.is_empty() {
            bail!(
                "No requirements.yaml or duodep pyproject.toml found in {} (depth {})",
                directory,
                args.depth
            );
        }
        found.into_iter().map(|path| path.to_string()).collect()
    } else {
        args.files.clone()
    };

    if !args.stdout {
        ctx.output
            .info(&format!("Merging {} requirement file(s)", references.len()));
    }

    let roots = load_roots(&references, ctx)?;
    let merged = merge_documents(roots, &FsLoader::new(), &settings.merge_request())
        .context("Failed to merge requirement files")?;
    report(&merged, ctx);

    let spec = merged.environment(args.name.clone(), settings.selector_style);
    let text = render_environment(&spec, settings.selector_style)?;

    if args.stdout {
        ctx.output.data(text.trim_end());
        return Ok(());
    }

    let path = ctx.resolve(&args.output);
    std::fs::write(&path, &text).with_context(|| format!("Failed to write {}", path))?;
    ctx.output.success(&format!(
        "Wrote {} ({} conda, {} pip dependencies)",
        path,
        spec.conda.len(),
        spec.pip.len()
    ));
    Ok(())
}

/// Environment file as written with `sel(...)` selectors
#[derive(Serialize)]
struct EnvironmentFile<'a> {
    name: &'a str,
    channels: &'a [String],
    dependencies: Vec<EnvironmentEntry<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    platforms: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EnvironmentEntry<'a> {
    Conda(&'a str),
    Selected(BTreeMap<String, &'a str>),
    Pip { pip: &'a [String] },
}

/// Render an environment spec as `environment.yaml` text
pub fn render_environment(spec: &EnvironmentSpec, style: SelectorStyle) -> Result<String> {
    let mut text = format!(
        "# This file is generated by duodep {}; edit the requirement files instead.\n",
        env!("CARGO_PKG_VERSION")
    );
    match style {
        SelectorStyle::Sel => text.push_str(&render_sel(spec)?),
        SelectorStyle::Comment => text.push_str(&render_comment(spec)?),
    }
    Ok(text)
}

fn render_sel(spec: &EnvironmentSpec) -> Result<String> {
    let mut dependencies: Vec<EnvironmentEntry<'_>> = spec
        .conda
        .iter()
        .map(|line| match &line.selector {
            Some(selector) => {
                EnvironmentEntry::Selected(BTreeMap::from([(selector.to_string(), line.requirement.as_str())]))
            },
            None => EnvironmentEntry::Conda(&line.requirement),
        })
        .collect();
    if !spec.pip.is_empty() {
        dependencies.push(EnvironmentEntry::Pip { pip: &spec.pip });
    }

    let file = EnvironmentFile {
        name: spec.name.as_deref().unwrap_or(DEFAULT_ENV_NAME),
        channels: &spec.channels,
        dependencies,
        platforms: spec.platforms.iter().map(|p| p.as_str()).collect(),
    };
    serde_yaml::to_string(&file).context("Failed to serialize the environment file")
}

fn render_comment(spec: &EnvironmentSpec) -> Result<String> {
    let mut lines = vec![format!(
        "name: {}",
        scalar(spec.name.as_deref().unwrap_or(DEFAULT_ENV_NAME))?
    )];

    if spec.channels.is_empty() {
        lines.push("channels: []".to_string());
    } else {
        lines.push("channels:".to_string());
        for channel in &spec.channels {
            lines.push(format!("  - {}", scalar(channel)?));
        }
    }

    lines.push("dependencies:".to_string());
    for CondaLine { requirement, selector } in &spec.conda {
        match selector {
            Some(selector) => lines.push(format!("  - {}  # {}", scalar(requirement)?, selector)),
            None => lines.push(format!("  - {}", scalar(requirement)?)),
        }
    }
    if !spec.pip.is_empty() {
        lines.push("  - pip:".to_string());
        for requirement in &spec.pip {
            lines.push(format!("    - {}", scalar(requirement)?));
        }
    }

    if !spec.platforms.is_empty() {
        lines.push("platforms:".to_string());
        for platform in &spec.platforms {
            lines.push(format!("  - {}", platform));
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text)
}

/// YAML scalar, quoted only when needed
fn scalar(value: &str) -> Result<String> {
    let rendered = serde_yaml::to_string(value).context("Failed to serialize a YAML scalar")?;
    Ok(rendered.trim_end().to_string())
}
