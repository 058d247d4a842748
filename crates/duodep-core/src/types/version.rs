//! PEP 440 style version numbers.
//!
//! Python and conda versions are release segments of arbitrary length
//! (`1`, `1.0`, `2021.03.1`) with optional pre-release, post-release, dev and
//! local parts. Release segments compare with zero padding so `1 == 1.0`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// A parsed version (`[N!]N(.N)*[{a|b|rc}N][.postN][.devN][+local]`)
#[derive(Debug, Clone)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<PreRelease>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<String>,
}

/// Pre-release phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreKind {
    Alpha,
    Beta,
    Rc,
}

/// Pre-release tag such as `rc1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreRelease {
    pub kind: PreKind,
    pub number: u64,
}

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {input}")]
    InvalidFormat { input: String },

    #[error("Invalid number in version: {component}")]
    InvalidNumber { component: String },

    #[error("Unexpected suffix `{suffix}` in version {input}")]
    InvalidSuffix { input: String, suffix: String },
}

const PRE_TAGS: [(&str, PreKind); 8] = [
    ("alpha", PreKind::Alpha),
    ("beta", PreKind::Beta),
    ("preview", PreKind::Rc),
    ("pre", PreKind::Rc),
    ("rc", PreKind::Rc),
    ("a", PreKind::Alpha),
    ("b", PreKind::Beta),
    ("c", PreKind::Rc),
];
const POST_TAGS: [&str; 3] = ["post", "rev", "r"];

impl Version {
    /// Create a final release version from its segments
    pub fn new(release: &[u64]) -> Self {
        Self {
            epoch: 0,
            release: release.to_vec(),
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    /// Check if this is a pre-release or dev version
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// The smallest final release above every version starting with the
    /// first `len` release segments, e.g. `1.4.5` with `len = 2` gives `1.5`
    pub fn bump_prefix(&self, len: usize) -> Version {
        let len = len.clamp(1, self.release.len().max(1));
        let mut release: Vec<u64> = self.release.iter().take(len).copied().collect();
        if release.is_empty() {
            release.push(0);
        }
        if let Some(last) = release.last_mut() {
            *last += 1;
        }
        Version {
            epoch: self.epoch,
            ..Version::new(&release)
        }
    }

    fn release_cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (Some(pre), _, _) => PreKey::Pre(pre),
            // 1.0.dev1 sorts before 1.0a1
            (None, None, Some(_)) => PreKey::DevOnly,
            _ => PreKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        match self.dev {
            Some(n) => DevKey::Dev(n),
            None => DevKey::Release,
        }
    }

    fn trimmed_release(&self) -> &[u64] {
        let end = self
            .release
            .iter()
            .rposition(|segment| *segment != 0)
            .map_or(0, |i| i + 1);
        &self.release[..end]
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease),
    Final,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Release,
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || VersionError::InvalidFormat {
            input: input.to_string(),
        };
        let lowered = input.to_ascii_lowercase();
        let mut rest = lowered.strip_prefix('v').unwrap_or(&lowered);

        // Split off local version label
        let local = match rest.split_once('+') {
            Some((head, label)) => {
                if label.is_empty()
                    || !label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
                {
                    return Err(invalid());
                }
                rest = head;
                Some(label.replace(['-', '_'], "."))
            },
            None => None,
        };

        // Split off epoch
        let epoch = match rest.split_once('!') {
            Some((epoch, tail)) => {
                rest = tail;
                parse_number(epoch)?
            },
            None => 0,
        };

        // Release segments
        let mut release = Vec::new();
        loop {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                break;
            }
            release.push(parse_number(&rest[..digits])?);
            rest = &rest[digits..];
            match rest.strip_prefix('.') {
                Some(tail) if tail.starts_with(|c: char| c.is_ascii_digit()) => rest = tail,
                _ => break,
            }
        }
        if release.is_empty() {
            return Err(invalid());
        }

        let mut version = Version {
            epoch,
            release,
            pre: None,
            post: None,
            dev: None,
            local,
        };

        while !rest.is_empty() {
            let unexpected = || VersionError::InvalidSuffix {
                input: input.to_string(),
                suffix: rest.to_string(),
            };

            // Implicit post release: 1.0-1
            if let Some(tail) = rest.strip_prefix('-') {
                let digits = tail.chars().take_while(|c| c.is_ascii_digit()).count();
                if digits > 0 && version.post.is_none() && version.dev.is_none() {
                    version.post = Some(parse_number(&tail[..digits])?);
                    rest = &tail[digits..];
                    continue;
                }
            }

            let body = rest.strip_prefix(['.', '-', '_']).unwrap_or(rest);

            if version.pre.is_none() && version.post.is_none() && version.dev.is_none() {
                if let Some((tag, kind)) = PRE_TAGS.iter().find(|(tag, _)| body.starts_with(tag)) {
                    let (number, tail) = take_number(&body[tag.len()..])?;
                    version.pre = Some(PreRelease { kind: *kind, number });
                    rest = tail;
                    continue;
                }
            }

            if version.post.is_none() && version.dev.is_none() {
                if let Some(tag) = POST_TAGS.iter().find(|tag| body.starts_with(*tag)) {
                    let (number, tail) = take_number(&body[tag.len()..])?;
                    version.post = Some(number);
                    rest = tail;
                    continue;
                }
            }

            if version.dev.is_none() {
                if let Some(tail) = body.strip_prefix("dev") {
                    let (number, tail) = take_number(tail)?;
                    version.dev = Some(number);
                    rest = tail;
                    continue;
                }
            }

            return Err(unexpected());
        }

        Ok(version)
    }
}

fn parse_number(text: &str) -> Result<u64, VersionError> {
    text.parse().map_err(|_| VersionError::InvalidNumber {
        component: text.to_string(),
    })
}

/// Parse an optional separator and number after a tag; a missing number is 0
fn take_number(text: &str) -> Result<(u64, &str), VersionError> {
    let body = text.strip_prefix(['.', '-', '_']).unwrap_or(text);
    let digits = body.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Ok((0, text));
    }
    Ok((parse_number(&body[..digits])?, &body[digits..]))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(|n| n.to_string()).collect();
        f.write_str(&release.join("."))?;

        if let Some(pre) = self.pre {
            let tag = match pre.kind {
                PreKind::Alpha => "a",
                PreKind::Beta => "b",
                PreKind::Rc => "rc",
            };
            write!(f, "{}{}", tag, pre.number)?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{}", post)?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{}", dev)?;
        }
        if let Some(ref local) = self.local {
            write!(f, "+{}", local)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.trimmed_release().hash(state);
        self.pre.hash(state);
        self.post.hash(state);
        self.dev.hash(state);
        self.local.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.release_cmp(other))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn test_version_parsing() {
        let version = v("1.2.3");
        assert_eq!(version.release, vec![1, 2, 3]);
        assert_eq!(version.pre, None);
        assert_eq!(version.local, None);

        let version = v("2!1.0rc2.post3.dev4+ubuntu-1");
        assert_eq!(version.epoch, 2);
        assert_eq!(
            version.pre,
            Some(PreRelease {
                kind: PreKind::Rc,
                number: 2
            })
        );
        assert_eq!(version.post, Some(3));
        assert_eq!(version.dev, Some(4));
        assert_eq!(version.local.as_deref(), Some("ubuntu.1"));
    }

    #[test]
    fn test_version_normalized_display() {
        assert_eq!(v("1.0.0rc1").to_string(), "1.0.0rc1");
        assert_eq!(v("v1.0-alpha.2").to_string(), "1.0a2");
        assert_eq!(v("1.0-1").to_string(), "1.0.post1");
        assert_eq!(v("3.11").to_string(), "3.11");
    }

    #[test]
    fn test_invalid_versions() {
        assert!(Version::from_str("").is_err());
        assert!(Version::from_str("abc").is_err());
        assert!(Version::from_str("1.2.*").is_err());
        assert!(Version::from_str("1.0+").is_err());
        assert!(Version::from_str("1.0foo").is_err());
    }

    #[test]
    fn test_zero_padding_equality() {
        assert_eq!(v("1"), v("1.0"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_ne!(v("1.0"), v("1.0.1"));
    }

    #[test]
    fn test_pep440_ordering() {
        let ordered = [
            "1.0.dev0", "1.0a1", "1.0a2.dev1", "1.0a2", "1.0b1", "1.0rc1", "1.0", "1.0+local",
            "1.0.post1.dev1", "1.0.post1", "1.1", "2!0.5",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_bump_prefix() {
        assert_eq!(v("1.4.5").bump_prefix(2).to_string(), "1.5");
        assert_eq!(v("2.2").bump_prefix(1).to_string(), "3");
        assert_eq!(v("1.2").bump_prefix(5).to_string(), "1.3");
    }
}
