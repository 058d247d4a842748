//! Command implementations and dispatch logic.
//!
//! Each command loads settings, reads its requirement files relative to the
//! context's working directory and prints through the [`OutputHandler`].

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use tracing::info;

use duodep_config::{load_document, CliOverrides};
use duodep_core::utils::split_path_and_extras;
use duodep_core::Platform;
use duodep_resolver::{ConflictPolicy, MergeOutput, RootRequest, SelectorStyle};

pub mod list;
pub mod merge;


use crate::{output::OutputHandler, Commands};

/// Shared context for all commands
pub struct CommandContext {
    pub cwd: Utf8PathBuf,
    pub output: OutputHandler,
}

impl CommandContext {
    /// Create a new command context
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let cwd = Utf8PathBuf::try_from(cwd).context("Current directory is not valid UTF-8")?;
        Ok(Self {
            cwd,
            output: OutputHandler::new(),
        })
    }

    /// Resolve a command line path against the working directory
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Flags that feed the settings layers
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Platform to resolve for; repeat for several
    #[arg(short = 'p', long = "platform", value_name = "PLATFORM")]
    pub platforms: Vec<Platform>,

    /// What to do with contradicting pins: raise or keep-first
    #[arg(long, value_name = "POLICY")]
    pub conflict_policy: Option<ConflictPolicy>,

    /// Drop the version pins of a package
    #[arg(long = "ignore-pin", value_name = "NAME")]
    pub ignore_pins: Vec<String>,

    /// Leave a package out entirely
    #[arg(long = "skip-dependency", value_name = "NAME")]
    pub skip_dependencies: Vec<String>,

    /// Replace every pin of a package, e.g. "numpy >=1.26"
    #[arg(long = "overwrite-pin", value_name = "NAME SPEC")]
    pub overwrite_pins: Vec<String>,
}

impl OverrideArgs {
    pub fn into_cli(self, selector_style: Option<SelectorStyle>) -> CliOverrides {
        CliOverrides {
            platforms: self.platforms,
            conflict_policy: self.conflict_policy,
            selector_style,
            ignore_pins: self.ignore_pins,
            skip_dependencies: self.skip_dependencies,
            overwrite_pins: self.overwrite_pins,
        }
    }
}

/// Dispatch a command to its handler
pub fn dispatch_command(command: Commands, ctx: &CommandContext) -> Result<()> {
    match command {
        Commands::Merge(args) => {
            info!("Merging requirement files (files: {:?})", args.files);
            merge::execute(args, ctx)
        },
        Commands::Conda(args) => {
            info!("Listing conda dependencies of {}", args.file);
            list::execute_side(duodep_core::Side::Conda, args, ctx)
        },
        Commands::Pip(args) => {
            info!("Listing pip dependencies of {}", args.file);
            list::execute_side(duodep_core::Side::Pip, args, ctx)
        },
        Commands::Local(args) => {
            info!("Listing local packages of {}", args.file);
            list::execute_local(args, ctx)
        },
        Commands::Version => {
            info!("Showing version information");
            show_version(ctx)
        },
    }
}

/// Load `path[extra,...]` arguments as merge roots
pub fn load_roots(references: &[String], ctx: &CommandContext) -> Result<Vec<RootRequest>> {
    references
        .iter()
        .map(|reference| {
            let (path, extras) = split_path_and_extras(reference);
            let path = ctx.resolve(Utf8Path::new(path));
            let document =
                load_document(&path).with_context(|| format!("Failed to load {}", path))?;
            Ok(RootRequest::new(document).with_extras(extras))
        })
        .collect()
}

/// Surface downgraded conflicts and applied overrides
pub fn report(output: &MergeOutput, ctx: &CommandContext) {
    for warning in &output.warnings {
        ctx.output.warn(&format!("Conflicting pins: {}", warning));
    }
    for applied in &output.overrides.applied {
        ctx.output.info(&format!(
            "Override on `{}` touched {} declaration(s)",
            applied.package, applied.declarations
        ));
    }
}

pub fn show_version(ctx: &CommandContext) -> Result<()> {
    let target = format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS);

    ctx.output.heading(&format!("duodep v{}", env!("CARGO_PKG_VERSION")));
    ctx.output.data(&format!("Built: {}", env!("BUILD_DATE")));
    ctx.output.data(&format!("Target: {}", target));
    ctx.output.data(&format!("Rust: {}", env!("RUSTC_VERSION")));
    if let Some(platform) = Platform::current() {
        ctx.output.data(&format!("Platform: {}", platform));
    }

    Ok(())
}
