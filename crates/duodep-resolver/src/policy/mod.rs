//! Conflict policy applied around the merge engine
//!
//! Under [`ConflictPolicy::Raise`] the first intractable conflict aborts the
//! merge. Under [`ConflictPolicy::KeepFirst`] the later declaration loses the
//! overlapping platforms and the merge runs again, so the first-encountered
//! constraint survives. Every retry shrinks some record's platform set, which
//! bounds the loop.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use duodep_core::{CanonicalDependency, DuoError, Manager, PlatformSet, Side};

use crate::merge::{try_merge, MergeConflict, MergedSet};
use crate::ResolverResult;

/// What to do with an intractable conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Abort the merge
    #[default]
    Raise,
    /// Warn and keep the first-encountered declaration
    KeepFirst,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Raise => "raise",
            ConflictPolicy::KeepFirst => "keep-first",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" => Ok(ConflictPolicy::Raise),
            "keep-first" | "keep_first" | "warn" => Ok(ConflictPolicy::KeepFirst),
            other => Err(DuoError::ConfigValidation {
                field: "conflict_policy".to_string(),
                reason: format!("expected `raise` or `keep-first`, got `{}`", other),
            }),
        }
    }
}

/// A conflict that was downgraded to a warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictWarning {
    pub side: Side,
    pub package: String,
    pub platforms: PlatformSet,
    /// Spec that was kept
    pub kept: String,
    pub kept_origin: String,
    /// Spec that was dropped on `platforms`
    pub dropped: String,
    pub dropped_origin: String,
    pub reason: String,
}

impl ConflictWarning {
    fn from_conflict(conflict: &MergeConflict) -> Self {
        let (kept, dropped) = if conflict.first.origin.sequence <= conflict.second.origin.sequence {
            (&conflict.first, &conflict.second)
        } else {
            (&conflict.second, &conflict.first)
        };
        Self {
            side: conflict.side,
            package: conflict.package.clone(),
            platforms: conflict.platforms,
            kept: kept.spec_display(),
            kept_origin: kept.origin.to_string(),
            dropped: dropped.spec_display(),
            dropped_origin: dropped.origin.to_string(),
            reason: conflict.reason.to_string(),
        }
    }
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} `{}` on [{}]: kept `{}` ({}), dropped `{}` ({}): {}",
            self.side,
            self.package,
            self.platforms,
            self.kept,
            self.kept_origin,
            self.dropped,
            self.dropped_origin,
            self.reason
        )
    }
}

/// Merge records under a conflict policy
pub fn merge_with_policy(
    mut records: Vec<CanonicalDependency>,
    targets: PlatformSet,
    authoritative: &BTreeSet<String>,
    policy: ConflictPolicy,
) -> ResolverResult<(MergedSet, Vec<ConflictWarning>)> {
    let mut warnings = Vec::new();

    loop {
        let conflict = match try_merge(&records, targets, authoritative) {
            Ok(merged) => return Ok((merged, warnings)),
            Err(conflict) => conflict,
        };

        if policy == ConflictPolicy::Raise {
            return Err(conflict.into());
        }

        let warning = ConflictWarning::from_conflict(&conflict);
        warn!("Version conflict: {}", warning);
        warnings.push(warning);

        let before = coverage(&records);
        records = drop_later(records, &conflict);
        let after = coverage(&records);
        if after >= before {
            // Nothing to drop; report the conflict rather than loop
            return Err(conflict.into());
        }
    }
}

/// Platforms summed over every (record, manager) pair
fn coverage(records: &[CanonicalDependency]) -> usize {
    records
        .iter()
        .map(|record| {
            let sides = if record.manager == Manager::Both { 2 } else { 1 };
            record.platforms.len() * sides
        })
        .sum()
}

/// Remove the conflicting platforms from the later declaration on the
/// conflicting manager side
fn drop_later(records: Vec<CanonicalDependency>, conflict: &MergeConflict) -> Vec<CanonicalDependency> {
    let later = conflict.later_sequence();
    let mut result = Vec::with_capacity(records.len() + 1);

    for mut record in records {
        let affected = record.origin.sequence == later
            && record.name_for(conflict.side) == Some(conflict.package.as_str());
        if !affected {
            result.push(record);
            continue;
        }

        if record.manager == Manager::Both {
            // The other manager keeps every platform
            let mut other = record.clone();
            other.manager = match conflict.side {
                Side::Conda => Manager::PipOnly,
                Side::Pip => Manager::CondaOnly,
            };
            result.push(other);
            record.manager = match conflict.side {
                Side::Conda => Manager::CondaOnly,
                Side::Pip => Manager::PipOnly,
            };
        }

        record.platforms = record.platforms.difference(&conflict.platforms);
        if !record.platforms.is_empty() {
            result.push(record);
        }
    }

    result
}
