//! Platform identifiers, platform sets and selector expansion.
//!
//! A selector such as `linux64` or `unix` restricts a dependency entry to a
//! subset of the six supported platforms. Sets are stored as a bitmask so they
//! are `Copy` and iterate in canonical platform order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DuoError, DuoResult};

/// A concrete target platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "linux-64")]
    Linux64,
    #[serde(rename = "linux-aarch64")]
    LinuxAarch64,
    #[serde(rename = "linux-ppc64le")]
    LinuxPpc64le,
    #[serde(rename = "osx-64")]
    Osx64,
    #[serde(rename = "osx-arm64")]
    OsxArm64,
    #[serde(rename = "win-64")]
    Win64,
}

impl Platform {
    /// All platforms in canonical order
    pub const ALL: [Platform; 6] = [
        Platform::Linux64,
        Platform::LinuxAarch64,
        Platform::LinuxPpc64le,
        Platform::Osx64,
        Platform::OsxArm64,
        Platform::Win64,
    ];

    /// Conda subdir name, e.g. `linux-64`
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win64 => "win-64",
        }
    }

    /// The selector that matches only this platform
    pub fn selector(&self) -> Selector {
        match self {
            Platform::Linux64 => Selector::Linux64,
            Platform::LinuxAarch64 => Selector::Aarch64,
            Platform::LinuxPpc64le => Selector::Ppc64le,
            Platform::Osx64 => Selector::Osx64,
            Platform::OsxArm64 => Selector::Arm64,
            Platform::Win64 => Selector::Win64,
        }
    }

    /// Operating system family used by conda's `sel(...)` syntax
    pub fn family(&self) -> &'static str {
        match self {
            Platform::Linux64 | Platform::LinuxAarch64 | Platform::LinuxPpc64le => "linux",
            Platform::Osx64 | Platform::OsxArm64 => "osx",
            Platform::Win64 => "win",
        }
    }

    /// PEP 508 environment marker selecting this platform
    pub fn pep508_marker(&self) -> &'static str {
        match self {
            Platform::Linux64 => "sys_platform == 'linux' and platform_machine == 'x86_64'",
            Platform::LinuxAarch64 => "sys_platform == 'linux' and platform_machine == 'aarch64'",
            Platform::LinuxPpc64le => "sys_platform == 'linux' and platform_machine == 'ppc64le'",
            Platform::Osx64 => "sys_platform == 'darwin' and platform_machine == 'x86_64'",
            Platform::OsxArm64 => "sys_platform == 'darwin' and platform_machine == 'arm64'",
            Platform::Win64 => "sys_platform == 'win32' and platform_machine == 'AMD64'",
        }
    }

    /// Platform of the running process, if it is a supported one
    pub fn current() -> Option<Platform> {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("linux", "x86_64") => Some(Platform::Linux64),
            ("linux", "aarch64") => Some(Platform::LinuxAarch64),
            ("linux", "powerpc64") => Some(Platform::LinuxPpc64le),
            ("macos", "x86_64") => Some(Platform::Osx64),
            ("macos", "aarch64") => Some(Platform::OsxArm64),
            ("windows", "x86_64") => Some(Platform::Win64),
            _ => None,
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| DuoError::UnknownPlatform {
                platform: s.to_string(),
            })
    }
}

/// An ordered set of platforms
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PlatformSet(u8);

impl PlatformSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every supported platform
    pub const fn all() -> Self {
        Self(0b11_1111)
    }

    /// A set holding one platform
    pub fn single(platform: Platform) -> Self {
        Self(platform.bit())
    }

    pub fn insert(&mut self, platform: Platform) {
        self.0 |= platform.bit();
    }

    pub fn remove(&mut self, platform: Platform) {
        self.0 &= !platform.bit();
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.0 & platform.bit() != 0
    }

    pub fn union(&self, other: &PlatformSet) -> PlatformSet {
        Self(self.0 | other.0)
    }

    pub fn intersection(&self, other: &PlatformSet) -> PlatformSet {
        Self(self.0 & other.0)
    }

    pub fn difference(&self, other: &PlatformSet) -> PlatformSet {
        Self(self.0 & !other.0)
    }

    pub fn is_subset(&self, other: &PlatformSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate platforms in canonical order
    pub fn iter(&self) -> impl Iterator<Item = Platform> + '_ {
        Platform::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    /// First platform in canonical order
    pub fn first(&self) -> Option<Platform> {
        self.iter().next()
    }
}

impl FromIterator<Platform> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = Platform>>(iter: I) -> Self {
        let mut set = PlatformSet::empty();
        for platform in iter {
            set.insert(platform);
        }
        set
    }
}

impl fmt::Debug for PlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|p| p.as_str())).finish()
    }
}

impl fmt::Display for PlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|p| p.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl Serialize for PlatformSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for PlatformSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let platforms = Vec::<Platform>::deserialize(deserializer)?;
        Ok(platforms.into_iter().collect())
    }
}

/// A platform selector token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Linux64,
    Aarch64,
    Ppc64le,
    Osx64,
    Arm64,
    Win64,
    Win,
    Unix,
    Linux,
    Osx,
    Macos,
}

impl Selector {
    pub const ALL: [Selector; 11] = [
        Selector::Linux64,
        Selector::Aarch64,
        Selector::Ppc64le,
        Selector::Osx64,
        Selector::Arm64,
        Selector::Win64,
        Selector::Win,
        Selector::Unix,
        Selector::Linux,
        Selector::Osx,
        Selector::Macos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Selector::Linux64 => "linux64",
            Selector::Aarch64 => "aarch64",
            Selector::Ppc64le => "ppc64le",
            Selector::Osx64 => "osx64",
            Selector::Arm64 => "arm64",
            Selector::Win64 => "win64",
            Selector::Win => "win",
            Selector::Unix => "unix",
            Selector::Linux => "linux",
            Selector::Osx => "osx",
            Selector::Macos => "macos",
        }
    }

    /// Platforms matched by this selector
    pub fn platforms(&self) -> PlatformSet {
        use Platform::*;
        match self {
            Selector::Linux64 => PlatformSet::single(Linux64),
            Selector::Aarch64 => PlatformSet::single(LinuxAarch64),
            Selector::Ppc64le => PlatformSet::single(LinuxPpc64le),
            Selector::Osx64 => PlatformSet::single(Osx64),
            Selector::Arm64 => PlatformSet::single(OsxArm64),
            Selector::Win64 | Selector::Win => PlatformSet::single(Win64),
            Selector::Linux => [Linux64, LinuxAarch64, LinuxPpc64le].into_iter().collect(),
            Selector::Osx | Selector::Macos => [Osx64, OsxArm64].into_iter().collect(),
            Selector::Unix => [Linux64, LinuxAarch64, LinuxPpc64le, Osx64, OsxArm64]
                .into_iter()
                .collect(),
        }
    }
}

impl FromStr for Selector {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::ALL
            .into_iter()
            .find(|sel| sel.as_str() == s)
            .ok_or_else(|| DuoError::UnknownSelector {
                selector: s.to_string(),
                document: None,
            })
    }
}

/// Expand one selector token to its platform set
pub fn expand(token: &str) -> DuoResult<PlatformSet> {
    Ok(token.trim().parse::<Selector>()?.platforms())
}

/// Expand a space-separated selector list (`"linux64 win64"`) to the union
/// of the platforms each token matches
pub fn expand_all(selectors: &str) -> DuoResult<PlatformSet> {
    let mut set = PlatformSet::empty();
    let mut seen_any = false;
    for token in selectors.split_whitespace() {
        set = set.union(&expand(token)?);
        seen_any = true;
    }
    if !seen_any {
        return Err(DuoError::UnknownSelector {
            selector: selectors.to_string(),
            document: None,
        });
    }
    Ok(set)
}
