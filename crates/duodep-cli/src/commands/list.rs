//! `duodep conda`, `duodep pip` and `duodep local` command implementations.
//!
//! Print the resolved dependency list of one requirement file, per platform.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::Args;
use rayon::prelude::*;

use duodep_config::{FsLoader, Settings, SettingsLayering};
use duodep_core::types::{LocalPackage, LocalPackageKind};
use duodep_core::{Platform, PlatformSet, Side};
use duodep_resolver::{flatten, merge_documents, MergeOutput};

use super::{load_roots, report, CommandContext, OverrideArgs};

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Requirement file or directory, optionally suffixed with `[extra,...]`
    #[arg(default_value = ".")]
    pub file: String,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Separator between requirements; `\n` and `\t` are understood
    #[arg(long, default_value = " ")]
    pub separator: String,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Requirement file or directory, optionally suffixed with `[extra,...]`
    #[arg(default_value = ".")]
    pub file: String,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Execute `duodep conda` or `duodep pip`
pub fn execute_side(side: Side, args: ListArgs, ctx: &CommandContext) -> Result<()> {
    let settings = SettingsLayering::load(args.overrides.clone().into_cli(None))?;
    let platforms = list_platforms(&settings)?;
    let targets: PlatformSet = platforms.iter().copied().collect();

    let roots = load_roots(&[args.file.clone()], ctx)?;
    let request = settings.merge_request().with_platforms(targets);
    let merged = merge_documents(roots, &FsLoader::new(), &request)
        .with_context(|| format!("Failed to resolve {}", args.file))?;
    report(&merged, ctx);

    let lists = platform_lists(&merged, side, &platforms);
    ctx.output.data(&render_lists(&lists, &args.separator, args.json)?);
    Ok(())
}

/// Platforms to print: the configured ones, else the running platform
fn list_platforms(settings: &Settings) -> Result<Vec<Platform>> {
    if let Some(platforms) = settings.platforms {
        if !platforms.is_empty() {
            return Ok(platforms.iter().collect());
        }
    }
    match Platform::current() {
        Some(platform) => Ok(vec![platform]),
        None => bail!("Cannot detect the current platform; pass --platform"),
    }
}

/// Requirement strings of one manager for each platform
pub fn platform_lists(
    merged: &MergeOutput,
    side: Side,
    platforms: &[Platform],
) -> Vec<(Platform, Vec<String>)> {
    platforms
        .par_iter()
        .map(|&platform| (platform, merged.requirements(side, platform)))
        .collect()
}

/// Text or JSON for per-platform lists
pub fn render_lists(
    lists: &[(Platform, Vec<String>)],
    separator: &str,
    json: bool,
) -> Result<String> {
    if json {
        let map: BTreeMap<&str, &[String]> = lists
            .iter()
            .map(|(platform, requirements)| (platform.as_str(), requirements.as_slice()))
            .collect();
        return serde_json::to_string_pretty(&map).context("Failed to serialize the dependency lists");
    }

    let separator = unescape(separator);
    if let [(_, requirements)] = lists {
        return Ok(requirements.join(separator.as_str()));
    }
    Ok(lists
        .iter()
        .map(|(platform, requirements)| format!("{}: {}", platform, requirements.join(separator.as_str())))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn unescape(separator: &str) -> String {
    separator.replace("\\n", "\n").replace("\\t", "\t")
}

/// Execute `duodep local`
pub fn execute_local(args: LocalArgs, ctx: &CommandContext) -> Result<()> {
    let roots = load_roots(&[args.file.clone()], ctx)?;
    let flattened = flatten(roots, &FsLoader::new())
        .with_context(|| format!("Failed to resolve {}", args.file))?;

    let installable = installable_packages(&flattened.local_packages, ctx);
    ctx.output.data(&render_local(&installable, args.json)?);
    Ok(())
}

/// Local packages pip can install; the rest are reported and skipped
pub fn installable_packages<'a>(
    packages: &'a [LocalPackage],
    ctx: &CommandContext,
) -> Vec<&'a LocalPackage> {
    packages
        .iter()
        .filter(|package| match package.kind {
            LocalPackageKind::Archive | LocalPackageKind::Project { pip_installable: true } => true,
            LocalPackageKind::Project { pip_installable: false } => {
                ctx.output.warn(&format!(
                    "Skipping {}: no setup.py or [build-system] in pyproject.toml",
                    package.path
                ));
                false
            },
        })
        .collect()
}

pub fn render_local(packages: &[&LocalPackage], json: bool) -> Result<String> {
    if json {
        return serde_json::to_string_pretty(packages).context("Failed to serialize local packages");
    }
    Ok(packages
        .iter()
        .map(|package| package.path.as_str())
        .collect::<Vec<_>>()
        .join("\n"))
}
