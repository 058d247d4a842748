//! Settings layering, global config file and environment overrides
//!
//! Layers apply lowest priority first: built-in defaults, the global
//! `config.toml`, `DUODEP_*` environment variables, then command line flags.
//! Scalar settings are replaced by higher layers; override lists are
//! extended.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use duodep_core::error::DuoError;
use duodep_core::{Platform, PlatformSet};
use duodep_resolver::{ConflictPolicy, MergeRequest, Overrides, SelectorStyle};

use crate::ConfigResult;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DUODEP_";

/// Effective settings for one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Platforms to resolve for; `None` defers to the documents
    pub platforms: Option<PlatformSet>,
    pub conflict_policy: ConflictPolicy,
    pub selector_style: SelectorStyle,
    pub overrides: Overrides,
    /// Layers that contributed, in application order
    pub sources: Vec<SettingsSource>,
}

impl Settings {
    /// Merge request carrying these settings
    pub fn merge_request(&self) -> MergeRequest {
        let mut request = MergeRequest::new()
            .with_overrides(self.overrides.clone())
            .with_policy(self.conflict_policy);
        if let Some(platforms) = self.platforms {
            request = request.with_platforms(platforms);
        }
        request
    }
}

/// Where a setting came from
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsSource {
    /// Global config file
    Global(Utf8PathBuf),
    /// Environment variable
    Environment(String),
    /// CLI flag
    CommandLine,
}

/// Global `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector_style: Option<String>,

    pub ignore_pins: Vec<String>,

    pub skip_dependencies: Vec<String>,

    /// `"name spec"` strings
    pub overwrite_pins: Vec<String>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub platforms: Vec<Platform>,
    pub conflict_policy: Option<ConflictPolicy>,
    pub selector_style: Option<SelectorStyle>,
    pub ignore_pins: Vec<String>,
    pub skip_dependencies: Vec<String>,
    pub overwrite_pins: Vec<String>,
}

/// Settings layering and merging
pub struct SettingsLayering;

impl SettingsLayering {
    /// `<config_dir>/duodep/config.toml`
    pub fn global_config_path() -> Option<Utf8PathBuf> {
        let dir = dirs::config_dir()?;
        let dir = Utf8PathBuf::try_from(dir).ok()?;
        Some(dir.join("duodep").join("config.toml"))
    }

    /// Load a settings file; a missing file is not an error
    pub fn load_file(path: &Utf8Path) -> ConfigResult<Option<SettingsFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DuoError::io(format!("Failed to read {}", path), e))?;
        let file = toml::from_str(&content).map_err(|e| DuoError::TomlParse {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(file))
    }

    /// Resolve settings from every layer available to this process
    pub fn load(cli: CliOverrides) -> ConfigResult<Settings> {
        let global = match Self::global_config_path() {
            Some(path) => Self::load_file(&path)?.map(|file| (path, file)),
            None => None,
        };
        Self::merge_settings(global, Self::collect_env_overrides(), cli)
    }

    /// Merge multiple settings layers
    pub fn merge_settings(
        global: Option<(Utf8PathBuf, SettingsFile)>,
        env_overrides: HashMap<String, String>,
        cli_overrides: CliOverrides,
    ) -> ConfigResult<Settings> {
        let mut settings = Settings::default();

        if let Some((path, file)) = global {
            debug!("Applying settings from {}", path);
            Self::apply_file(&mut settings, file)?;
            settings.sources.push(SettingsSource::Global(path));
        }

        Self::apply_env_overrides(&mut settings, &env_overrides)?;
        Self::apply_cli_overrides(&mut settings, cli_overrides)?;

        Ok(settings)
    }

    fn apply_file(settings: &mut Settings, file: SettingsFile) -> ConfigResult<()> {
        if let Some(platforms) = file.platforms {
            settings.platforms = Some(parse_platforms(platforms.iter().map(String::as_str))?);
        }
        if let Some(policy) = file.conflict_policy {
            settings.conflict_policy = policy.parse()?;
        }
        if let Some(style) = file.selector_style {
            settings.selector_style = style.parse()?;
        }
        extend_overrides(
            settings,
            file.skip_dependencies,
            file.ignore_pins,
            &file.overwrite_pins,
        )
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(
        settings: &mut Settings,
        overrides: &HashMap<String, String>,
    ) -> ConfigResult<()> {
        let mut keys: Vec<&String> = overrides.keys().collect();
        keys.sort();

        for key in keys {
            let value = &overrides[key];
            match key.as_str() {
                "DUODEP_PLATFORMS" => {
                    settings.platforms = Some(parse_platforms(split_list(value).into_iter())?);
                },
                "DUODEP_CONFLICT_POLICY" => {
                    settings.conflict_policy = value.parse()?;
                },
                "DUODEP_SELECTOR_STYLE" => {
                    settings.selector_style = value.parse()?;
                },
                "DUODEP_IGNORE_PINS" => {
                    let names = split_list(value).into_iter().map(str::to_string).collect();
                    extend_overrides(settings, Vec::new(), names, &[])?;
                },
                "DUODEP_SKIP_DEPENDENCIES" => {
                    let names = split_list(value).into_iter().map(str::to_string).collect();
                    extend_overrides(settings, names, Vec::new(), &[])?;
                },
                "DUODEP_OVERWRITE_PINS" => {
                    // Pins may contain commas themselves
                    let pins: Vec<String> = split_list_on(value, ';')
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    extend_overrides(settings, Vec::new(), Vec::new(), &pins)?;
                },
                _ => {
                    // Unknown environment variable, ignore
                    continue;
                },
            }
            settings.sources.push(SettingsSource::Environment(key.clone()));
        }

        Ok(())
    }

    /// Apply CLI flag overrides
    fn apply_cli_overrides(settings: &mut Settings, cli: CliOverrides) -> ConfigResult<()> {
        let mut touched = false;

        if !cli.platforms.is_empty() {
            settings.platforms = Some(cli.platforms.iter().copied().collect());
            touched = true;
        }
        if let Some(policy) = cli.conflict_policy {
            settings.conflict_policy = policy;
            touched = true;
        }
        if let Some(style) = cli.selector_style {
            settings.selector_style = style;
            touched = true;
        }
        if !cli.skip_dependencies.is_empty()
            || !cli.ignore_pins.is_empty()
            || !cli.overwrite_pins.is_empty()
        {
            extend_overrides(
                settings,
                cli.skip_dependencies,
                cli.ignore_pins,
                &cli.overwrite_pins,
            )?;
            touched = true;
        }

        if touched {
            settings.sources.push(SettingsSource::CommandLine);
        }
        Ok(())
    }

    /// Collect environment variable overrides
    pub fn collect_env_overrides() -> HashMap<String, String> {
        std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect()
    }
}

fn extend_overrides(
    settings: &mut Settings,
    skip_dependencies: Vec<String>,
    ignore_pins: Vec<String>,
    overwrite_pins: &[String],
) -> ConfigResult<()> {
    let mut layer = Overrides {
        skip_dependencies,
        ignore_pins,
        ..Overrides::default()
    };
    for pin in overwrite_pins {
        layer.add_overwrite(pin)?;
    }
    settings.overrides.extend(layer);
    Ok(())
}

fn parse_platforms<'a>(names: impl Iterator<Item = &'a str>) -> ConfigResult<PlatformSet> {
    let mut set = PlatformSet::empty();
    for name in names {
        set.insert(name.parse::<Platform>()?);
    }
    Ok(set)
}

fn split_list(value: &str) -> Vec<&str> {
    split_list_on(value, ',')
}

fn split_list_on(value: &str, separator: char) -> Vec<&str> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn global_file() -> SettingsFile {
        SettingsFile {
            platforms: Some(vec!["linux-64".to_string(), "osx-arm64".to_string()]),
            conflict_policy: Some("keep-first".to_string()),
            ignore_pins: vec!["numpy".to_string()],
            overwrite_pins: vec!["scipy >=1.11".to_string()],
            ..SettingsFile::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings =
            SettingsLayering::merge_settings(None, HashMap::new(), CliOverrides::default()).unwrap();
        assert_eq!(settings.platforms, None);
        assert_eq!(settings.conflict_policy, ConflictPolicy::Raise);
        assert_eq!(settings.selector_style, SelectorStyle::Sel);
        assert!(settings.overrides.is_empty());
        assert!(settings.sources.is_empty());
    }

    #[test]
    fn test_layer_precedence() {
        let env = HashMap::from([
            ("DUODEP_CONFLICT_POLICY".to_string(), "raise".to_string()),
            ("DUODEP_IGNORE_PINS".to_string(), "pandas, numpy".to_string()),
            ("DUODEP_UNRELATED".to_string(), "x".to_string()),
        ]);
        let cli = CliOverrides {
            platforms: vec![Platform::Win64],
            selector_style: Some(SelectorStyle::Comment),
            skip_dependencies: vec!["pytest".to_string()],
            ..CliOverrides::default()
        };

        let settings = SettingsLayering::merge_settings(
            Some((Utf8PathBuf::from("/cfg/config.toml"), global_file())),
            env,
            cli,
        )
        .unwrap();

        // CLI replaces the file's platforms; env replaces the file's policy
        assert_eq!(settings.platforms, Some(PlatformSet::single(Platform::Win64)));
        assert_eq!(settings.conflict_policy, ConflictPolicy::Raise);
        assert_eq!(settings.selector_style, SelectorStyle::Comment);

        // Lists accumulate across layers
        assert_eq!(settings.overrides.ignore_pins, vec!["numpy", "pandas"]);
        assert_eq!(settings.overrides.skip_dependencies, vec!["pytest"]);
        assert_eq!(settings.overrides.overwrite_pins["scipy"], ">=1.11");

        assert_eq!(
            settings.sources,
            vec![
                SettingsSource::Global(Utf8PathBuf::from("/cfg/config.toml")),
                SettingsSource::Environment("DUODEP_CONFLICT_POLICY".to_string()),
                SettingsSource::Environment("DUODEP_IGNORE_PINS".to_string()),
                SettingsSource::CommandLine,
            ]
        );
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let env = HashMap::from([("DUODEP_CONFLICT_POLICY".to_string(), "maybe".to_string())]);
        let err = SettingsLayering::merge_settings(None, env, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, DuoError::ConfigValidation { .. }));

        let env = HashMap::from([("DUODEP_PLATFORMS".to_string(), "linux-64,beos".to_string())]);
        let err = SettingsLayering::merge_settings(None, env, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, DuoError::UnknownPlatform { .. }));

        let env = HashMap::from([("DUODEP_OVERWRITE_PINS".to_string(), "numpy".to_string())]);
        let err = SettingsLayering::merge_settings(None, env, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, DuoError::MalformedEntry { .. }));
    }

    #[test]
    fn test_overwrite_pins_from_env_keep_commas() {
        let env = HashMap::from([(
            "DUODEP_OVERWRITE_PINS".to_string(),
            "numpy >=1,<2; scipy >=1.11;".to_string(),
        )]);
        let settings = SettingsLayering::merge_settings(None, env, CliOverrides::default()).unwrap();
        let pins = &settings.overrides.overwrite_pins;
        assert_eq!(pins.len(), 2);
        assert_eq!(pins.get("numpy").map(String::as_str), Some(">=1,<2"));
        assert_eq!(pins.get("scipy").map(String::as_str), Some(">=1.11"));
    }

    #[test]
    fn test_load_file() {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp.path().join("config.toml")).unwrap();
        assert_eq!(SettingsLayering::load_file(&path).unwrap(), None);

        std::fs::write(
            &path,
            "platforms = [\"linux-64\"]\nselector_style = \"comment\"\nskip_dependencies = [\"pytest\"]\n",
        )
        .unwrap();
        let file = SettingsLayering::load_file(&path).unwrap().unwrap();
        assert_eq!(file.platforms, Some(vec!["linux-64".to_string()]));
        assert_eq!(file.selector_style.as_deref(), Some("comment"));

        std::fs::write(&path, "unknown_key = 1\n").unwrap();
        let err = SettingsLayering::load_file(&path).unwrap_err();
        assert!(matches!(err, DuoError::TomlParse { .. }));
    }

    #[test]
    fn test_merge_request_carries_settings() {
        let settings = Settings {
            platforms: Some(PlatformSet::single(Platform::Osx64)),
            conflict_policy: ConflictPolicy::KeepFirst,
            ..Settings::default()
        };
        let request = settings.merge_request();
        assert_eq!(request.platforms, Some(PlatformSet::single(Platform::Osx64)));
        assert_eq!(request.policy, ConflictPolicy::KeepFirst);
    }

    #[test]
    fn test_collect_env_overrides() {
        std::env::set_var("DUODEP_TEST_COLLECT", "1");
        std::env::set_var("NOT_DUODEP_TEST_COLLECT", "1");

        let overrides = SettingsLayering::collect_env_overrides();
        assert!(overrides.contains_key("DUODEP_TEST_COLLECT"));
        assert!(!overrides.contains_key("NOT_DUODEP_TEST_COLLECT"));

        std::env::remove_var("DUODEP_TEST_COLLECT");
        std::env::remove_var("NOT_DUODEP_TEST_COLLECT");
    }
}
